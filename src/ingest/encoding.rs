//! Text decoding for roster files exported by spreadsheet tools.
//!
//! Files arrive as UTF-8 or Windows-1252. Some exports have already lost
//! their accented characters; the known Portuguese casualties are repaired
//! from a fixed table.

use std::borrow::Cow;

use encoding_rs::WINDOWS_1252;

/// Words that lost their non-ASCII letters, and their repaired spelling.
const REPAIRS: &[(&str, &str)] = &[
    ("Execuo", "Execução"),
    ("Finanas", "Finanças"),
    ("Portiflio", "Portfólio"),
    ("Jurdico", "Jurídico"),
    ("Alocao", "Alocação"),
    ("Estratgico", "Estratégico"),
    ("Governana", "Governança"),
    ("Operao", "Operação"),
    ("Frum", "Fórum"),
    ("Direo", "Direção"),
];

/// Which decoder produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Windows1252,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub text: String,
    pub encoding: SourceEncoding,
    /// Number of table repairs applied.
    pub repairs: usize,
}

/// Decode `bytes` as UTF-8 when valid, otherwise as Windows-1252, then apply
/// the repair table.
pub fn decode(bytes: &[u8]) -> Decoded {
    let (raw, encoding) = match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), SourceEncoding::Utf8),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            (text, SourceEncoding::Windows1252)
        }
    };
    let (text, repairs) = repair(&raw);
    Decoded {
        text,
        encoding,
        repairs,
    }
}

/// Apply the repair table. Returns the text and how many replacements
/// were made.
pub fn repair(text: &str) -> (String, usize) {
    let mut out = text.to_string();
    let mut count = 0;
    for (broken, fixed) in REPAIRS {
        let hits = out.matches(broken).count();
        if hits > 0 {
            out = out.replace(broken, fixed);
            count += hits;
        }
    }
    (out, count)
}
