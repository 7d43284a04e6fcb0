//! Key mnemonic handling for automation input
//!
//! send_keys() strings mix plain text with bracketed mnemonics in the
//! classic emulator style: "user[tab]secret[enter]". This module tokenizes
//! those strings and maps mnemonics to 5250 AID codes through the KeyMapper
//! trait, which the session treats as an opaque translation function so
//! alternative keyboard layouts can be injected.

/// AID (Attention Identifier) codes sent to the host to identify which key
/// triggered input submission
pub const AID_ENTER: u8 = 0xF1;
pub const AID_CLEAR: u8 = 0xBD;
pub const AID_HELP: u8 = 0xF3;
pub const AID_ROLL_DOWN: u8 = 0xF4;
pub const AID_ROLL_UP: u8 = 0xF5;
pub const AID_PRINT: u8 = 0xF6;
pub const AID_F1: u8 = 0x31;
pub const AID_F13: u8 = 0xB1;

/// A decoded key mnemonic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMnemonic {
    Enter,
    /// Function keys F1..=F24
    Function(u8),
    Clear,
    Help,
    RollUp,
    RollDown,
    Print,
    /// Attention; transmitted out of band, no AID byte
    Attention,
    /// System Request; transmitted out of band, no AID byte
    SystemRequest,
    /// Local editing keys; never submit input
    Tab,
    BackTab,
    FieldExit,
}

impl KeyMnemonic {
    /// AID byte for mnemonics that submit input; None for out-of-band keys
    pub fn aid_code(&self) -> Option<u8> {
        match self {
            KeyMnemonic::Enter => Some(AID_ENTER),
            KeyMnemonic::Function(n @ 1..=12) => Some(AID_F1 + (n - 1)),
            KeyMnemonic::Function(n @ 13..=24) => Some(AID_F13 + (n - 13)),
            KeyMnemonic::Function(_) => None,
            KeyMnemonic::Clear => Some(AID_CLEAR),
            KeyMnemonic::Help => Some(AID_HELP),
            KeyMnemonic::RollUp => Some(AID_ROLL_UP),
            KeyMnemonic::RollDown => Some(AID_ROLL_DOWN),
            KeyMnemonic::Print => Some(AID_PRINT),
            KeyMnemonic::Attention | KeyMnemonic::SystemRequest => None,
            KeyMnemonic::Tab | KeyMnemonic::BackTab | KeyMnemonic::FieldExit => None,
        }
    }
}

/// One segment of a send_keys string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyToken {
    /// Literal text to type into the current field
    Text(String),
    /// Bracketed mnemonic name, lowercased, brackets stripped
    Mnemonic(String),
}

/// Split a send_keys string into text and mnemonic tokens.
///
/// "[[" and "]]" escape literal brackets. An unterminated "[" is kept as
/// literal text rather than dropped.
pub fn tokenize_keys(input: &str) -> Vec<KeyToken> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' if i + 1 < chars.len() && chars[i + 1] == '[' => {
                text.push('[');
                i += 2;
            }
            ']' if i + 1 < chars.len() && chars[i + 1] == ']' => {
                text.push(']');
                i += 2;
            }
            '[' => {
                match chars[i + 1..].iter().position(|&c| c == ']') {
                    Some(rel) => {
                        if !text.is_empty() {
                            tokens.push(KeyToken::Text(std::mem::take(&mut text)));
                        }
                        let name: String = chars[i + 1..i + 1 + rel].iter().collect();
                        tokens.push(KeyToken::Mnemonic(name.to_ascii_lowercase()));
                        i += rel + 2;
                    }
                    None => {
                        text.push('[');
                        i += 1;
                    }
                }
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        tokens.push(KeyToken::Text(text));
    }
    tokens
}

/// Translation from mnemonic names to protocol keys; injectable so a host
/// with nonstandard key assignments can provide its own table
pub trait KeyMapper: Send + Sync {
    fn map(&self, mnemonic: &str) -> Option<KeyMnemonic>;
}

/// The standard mnemonic table
#[derive(Debug, Default)]
pub struct DefaultKeyMapper;

impl KeyMapper for DefaultKeyMapper {
    fn map(&self, mnemonic: &str) -> Option<KeyMnemonic> {
        // pf1..pf24 and f1..f24 are both accepted
        if let Some(num) = mnemonic
            .strip_prefix("pf")
            .or_else(|| mnemonic.strip_prefix('f'))
        {
            if let Ok(n) = num.parse::<u8>() {
                return (1..=24).contains(&n).then_some(KeyMnemonic::Function(n));
            }
        }
        match mnemonic {
            "enter" => Some(KeyMnemonic::Enter),
            "clear" => Some(KeyMnemonic::Clear),
            "help" => Some(KeyMnemonic::Help),
            "rollup" | "pgdown" => Some(KeyMnemonic::RollUp),
            "rolldown" | "pgup" => Some(KeyMnemonic::RollDown),
            "print" => Some(KeyMnemonic::Print),
            "attn" => Some(KeyMnemonic::Attention),
            "sysreq" => Some(KeyMnemonic::SystemRequest),
            "tab" => Some(KeyMnemonic::Tab),
            "backtab" => Some(KeyMnemonic::BackTab),
            "fieldexit" | "fldext" => Some(KeyMnemonic::FieldExit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_input() {
        let tokens = tokenize_keys("user[tab]secret[enter]");
        assert_eq!(
            tokens,
            vec![
                KeyToken::Text("user".into()),
                KeyToken::Mnemonic("tab".into()),
                KeyToken::Text("secret".into()),
                KeyToken::Mnemonic("enter".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_escaped_brackets() {
        let tokens = tokenize_keys("a[[b]]c");
        assert_eq!(tokens, vec![KeyToken::Text("a[b]c".into())]);
    }

    #[test]
    fn test_tokenize_unterminated_bracket_is_text() {
        let tokens = tokenize_keys("abc[");
        assert_eq!(tokens, vec![KeyToken::Text("abc[".into())]);
    }

    #[test]
    fn test_function_key_aid_codes() {
        assert_eq!(KeyMnemonic::Function(1).aid_code(), Some(0x31));
        assert_eq!(KeyMnemonic::Function(12).aid_code(), Some(0x3C));
        assert_eq!(KeyMnemonic::Function(13).aid_code(), Some(0xB1));
        assert_eq!(KeyMnemonic::Function(24).aid_code(), Some(0xBC));
    }

    #[test]
    fn test_default_mapper() {
        let mapper = DefaultKeyMapper;
        assert_eq!(mapper.map("enter"), Some(KeyMnemonic::Enter));
        assert_eq!(mapper.map("pf3"), Some(KeyMnemonic::Function(3)));
        assert_eq!(mapper.map("f24"), Some(KeyMnemonic::Function(24)));
        assert_eq!(mapper.map("pf25"), None);
        assert_eq!(mapper.map("bogus"), None);
    }

    #[test]
    fn test_f_prefixed_words_are_not_function_keys() {
        let mapper = DefaultKeyMapper;
        assert_eq!(mapper.map("fieldexit"), Some(KeyMnemonic::FieldExit));
        assert_eq!(mapper.map("fldext"), Some(KeyMnemonic::FieldExit));
    }
}
