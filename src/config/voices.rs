//! Kokoro voice catalogue.
//!
//! The multi-lang v1.0 model ships 53 speakers. Each speaker belongs to a
//! language that decides how text is phonemized: English and Mandarin use the
//! bundled lexicons, everything else goes through espeak-ng.

use anyhow::{Result, anyhow};

use VoiceLanguage::*;

/// Language family of a Kokoro speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceLanguage {
    AmericanEnglish,
    BritishEnglish,
    Spanish,
    French,
    Hindi,
    Italian,
    Japanese,
    PortugueseBr,
    Mandarin,
}

impl VoiceLanguage {
    pub const ALL: [VoiceLanguage; 9] = [AmericanEnglish, BritishEnglish, Spanish, French, Hindi, Italian, Japanese, PortugueseBr, Mandarin];

    pub fn label(self) -> &'static str {
        match self {
            AmericanEnglish => "American English",
            BritishEnglish => "British English",
            Spanish => "Spanish",
            French => "French",
            Hindi => "Hindi",
            Italian => "Italian",
            Japanese => "Japanese",
            PortugueseBr => "Portuguese BR",
            Mandarin => "Mandarin Chinese",
        }
    }

    pub fn espeak_code(self) -> &'static str {
        match self {
            AmericanEnglish => "en-us",
            BritishEnglish => "en-gb",
            Spanish => "es",
            French => "fr-fr",
            Hindi => "hi",
            Italian => "it",
            Japanese => "ja",
            PortugueseBr => "pt-br",
            Mandarin => "cmn",
        }
    }

    /// Language tag Kokoro needs when no lexicon covers the voice; empty otherwise.
    /// Reference: <https://github.com/k2-fsa/sherpa-onnx/blob/master/sherpa-onnx/csrc/offline-tts-kokoro-model-config.cc>
    pub fn kokoro_lang(self) -> &'static str {
        match self {
            Spanish => "es",
            French => "fr",
            Hindi => "hi",
            Italian => "it",
            Japanese => "ja",
            PortugueseBr => "pt-br",
            AmericanEnglish | BritishEnglish | Mandarin => "",
        }
    }

    /// Lexicon files (relative to the model directory), in lookup order.
    pub fn lexicons(self) -> &'static [&'static str] {
        match self {
            AmericanEnglish => &["lexicon-us-en.txt"],
            BritishEnglish => &["lexicon-gb-en.txt"],
            // Mandarin falls back to English for mixed text
            Mandarin => &["lexicon-us-en.txt", "lexicon-zh.txt"],
            _ => &[],
        }
    }
}

/// A selectable speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub name: &'static str,
    pub speaker_id: i32,
    pub language: VoiceLanguage,
}

const fn voice(name: &'static str, speaker_id: i32, language: VoiceLanguage) -> Voice {
    Voice { name, speaker_id, language }
}

/// Sorted by name, which is also speaker id order.
const VOICES: &[Voice] = &[
    voice("af_alloy", 0, AmericanEnglish),
    voice("af_aoede", 1, AmericanEnglish),
    voice("af_bella", 2, AmericanEnglish),
    voice("af_heart", 3, AmericanEnglish),
    voice("af_jessica", 4, AmericanEnglish),
    voice("af_kore", 5, AmericanEnglish),
    voice("af_nicole", 6, AmericanEnglish),
    voice("af_nova", 7, AmericanEnglish),
    voice("af_river", 8, AmericanEnglish),
    voice("af_sarah", 9, AmericanEnglish),
    voice("af_sky", 10, AmericanEnglish),
    voice("am_adam", 11, AmericanEnglish),
    voice("am_echo", 12, AmericanEnglish),
    voice("am_eric", 13, AmericanEnglish),
    voice("am_fenrir", 14, AmericanEnglish),
    voice("am_liam", 15, AmericanEnglish),
    voice("am_michael", 16, AmericanEnglish),
    voice("am_onyx", 17, AmericanEnglish),
    voice("am_puck", 18, AmericanEnglish),
    voice("am_santa", 19, AmericanEnglish),
    voice("bf_alice", 20, BritishEnglish),
    voice("bf_emma", 21, BritishEnglish),
    voice("bf_isabella", 22, BritishEnglish),
    voice("bf_lily", 23, BritishEnglish),
    voice("bm_daniel", 24, BritishEnglish),
    voice("bm_fable", 25, BritishEnglish),
    voice("bm_george", 26, BritishEnglish),
    voice("bm_lewis", 27, BritishEnglish),
    voice("ef_dora", 28, Spanish),
    voice("em_alex", 29, Spanish),
    voice("ff_siwis", 30, French),
    voice("hf_alpha", 31, Hindi),
    voice("hf_beta", 32, Hindi),
    voice("hm_omega", 33, Hindi),
    voice("hm_psi", 34, Hindi),
    voice("if_sara", 35, Italian),
    voice("im_nicola", 36, Italian),
    voice("jf_alpha", 37, Japanese),
    voice("jf_gongitsune", 38, Japanese),
    voice("jf_nezumi", 39, Japanese),
    voice("jf_tebukuro", 40, Japanese),
    voice("jm_kumo", 41, Japanese),
    voice("pf_dora", 42, PortugueseBr),
    voice("pm_alex", 43, PortugueseBr),
    voice("pm_santa", 44, PortugueseBr),
    voice("zf_xiaobei", 45, Mandarin),
    voice("zf_xiaoni", 46, Mandarin),
    voice("zf_xiaoxiao", 47, Mandarin),
    voice("zf_xiaoyi", 48, Mandarin),
    voice("zm_yunjian", 49, Mandarin),
    voice("zm_yunxi", 50, Mandarin),
    voice("zm_yunxia", 51, Mandarin),
    voice("zm_yunyang", 52, Mandarin),
];

/// Voice used when nothing else is configured.
pub const DEFAULT_VOICE: &str = "af_bella";

/// Every voice, in speaker id order.
pub fn all() -> &'static [Voice] {
    VOICES
}

/// Look a voice up by name.
pub fn find(name: &str) -> Option<&'static Voice> {
    VOICES.binary_search_by(|v| v.name.cmp(name)).ok().map(|idx| &VOICES[idx])
}

/// Resolve a voice by name, or by catalogue index (clamped to the last voice).
pub fn resolve(selector: &str) -> Option<&'static Voice> {
    match selector.parse::<usize>() {
        Ok(index) => VOICES.get(index.min(VOICES.len() - 1)),
        Err(_) => find(selector),
    }
}

/// Print the catalogue grouped by language.
pub fn print_catalogue() {
    println!("Kokoro TTS v1.0 - {} voices", VOICES.len());

    for language in VoiceLanguage::ALL {
        let voices: Vec<&Voice> = VOICES.iter().filter(|v| v.language == language).collect();

        println!();
        println!("{} ({} voices, espeak {})", language.label(), voices.len(), language.espeak_code());
        for v in voices {
            println!("  {:<15} {:>3}", v.name, v.speaker_id);
        }
    }

    println!();
    println!("Select with --tts-voice <name|index> (default: {})", DEFAULT_VOICE);
}

/// Print a single voice.
pub fn print_voice(selector: &str) -> Result<()> {
    let voice = resolve(selector).ok_or_else(|| anyhow!("Voice '{}' not found. Run with --list-voices to see available voices", selector))?;

    println!("Voice:       {}", voice.name);
    println!("Speaker ID:  {}", voice.speaker_id);
    println!("Language:    {}", voice.language.label());
    println!("espeak code: {}", voice.language.espeak_code());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_is_sorted_for_lookup() {
        assert_eq!(VOICES.len(), 53);
        assert!(VOICES.windows(2).all(|w| w[0].name < w[1].name));
        assert!(VOICES.iter().enumerate().all(|(i, v)| v.speaker_id == i as i32));
    }

    #[test]
    fn test_resolve_by_name_and_index() {
        assert_eq!(resolve("bf_emma").map(|v| v.speaker_id), Some(21));
        assert_eq!(resolve("2").map(|v| v.name), Some(DEFAULT_VOICE));
        assert_eq!(resolve("999").map(|v| v.name), Some("zm_yunyang"));
        assert!(resolve("xx_nobody").is_none());
    }

    #[test]
    fn test_print_voice_rejects_unknown_selector() {
        assert!(print_voice("bf_emma").is_ok());
        let err = print_voice("xx_nobody").unwrap_err();
        assert!(err.to_string().contains("--list-voices"));
    }

    #[test]
    fn test_language_phonemizer_settings() {
        assert_eq!(French.kokoro_lang(), "fr");
        assert!(French.lexicons().is_empty());
        assert_eq!(AmericanEnglish.kokoro_lang(), "");
        assert_eq!(Mandarin.lexicons().len(), 2);
    }
}
