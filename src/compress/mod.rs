//! LZW codec for the archive body.
//!
//! Classic LZW with a 256-entry initial dictionary (one entry per byte
//! value) and no dictionary reset; code words are 32 bits. The whole body
//! is framed as:
//!
//! ```text
//! [u64 code_count (LE)] [code_count x u32 code (LE)]
//! ```
//!
//! An empty input compresses to a frame with `code_count = 0`. The decoder
//! accepts the well-known `w + w[0]` case where the encoder emits the code
//! it is about to add; any code beyond that is corruption.

use std::collections::HashMap;

use crate::error::PackError;

/// Compresses `data` into a framed LZW code stream.
pub fn compress(data: &[u8]) -> Vec<u8> {
    // Sequences are keyed as (code of prefix, next byte); codes 0..=255 are
    // the implicit single-byte entries.
    let mut dictionary: HashMap<(u32, u8), u32> = HashMap::new();
    let mut next_code: u32 = 256;

    let mut codes: Vec<u32> = Vec::new();
    let mut current: Option<u32> = None;

    for &byte in data {
        match current {
            None => current = Some(u32::from(byte)),
            Some(cur) => {
                if let Some(&code) = dictionary.get(&(cur, byte)) {
                    current = Some(code);
                } else {
                    codes.push(cur);
                    dictionary.insert((cur, byte), next_code);
                    next_code += 1;
                    current = Some(u32::from(byte));
                }
            }
        }
    }
    if let Some(cur) = current {
        codes.push(cur);
    }

    let mut out = Vec::with_capacity(8 + codes.len() * 4);
    out.extend_from_slice(&(codes.len() as u64).to_le_bytes());
    for code in codes {
        out.extend_from_slice(&code.to_le_bytes());
    }
    out
}

/// Decompresses a framed LZW code stream produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PackError> {
    if data.len() < 8 {
        return Err(PackError::BadArchive(
            "compressed body shorter than its length frame".into(),
        ));
    }
    let code_count = u64::from_le_bytes(data[..8].try_into().unwrap());
    let code_bytes = &data[8..];

    let expected = code_count
        .checked_mul(4)
        .filter(|&n| n == code_bytes.len() as u64)
        .is_some();
    if !expected {
        return Err(PackError::BadArchive(format!(
            "compressed body declares {} codes but carries {} code bytes",
            code_count,
            code_bytes.len()
        )));
    }
    if code_count == 0 {
        return Ok(Vec::new());
    }

    let mut codes = code_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()));

    // Dictionary entries 0..=255 are the single-byte strings.
    let mut dictionary: Vec<Vec<u8>> = (0u8..=255).map(|b| vec![b]).collect();

    let first = codes.next().unwrap();
    if first > 255 {
        return Err(PackError::BadArchive(format!(
            "first LZW code {} is not a literal",
            first
        )));
    }
    let mut previous = dictionary[first as usize].clone();
    let mut out = previous.clone();

    for code in codes {
        let entry = match (code as usize).cmp(&dictionary.len()) {
            std::cmp::Ordering::Less => dictionary[code as usize].clone(),
            // The encoder emitted the code it was about to add: w + w[0].
            std::cmp::Ordering::Equal => {
                let mut e = previous.clone();
                e.push(previous[0]);
                e
            }
            std::cmp::Ordering::Greater => {
                return Err(PackError::BadArchive(format!(
                    "LZW code {} beyond dictionary of {} entries",
                    code,
                    dictionary.len()
                )));
            }
        };

        out.extend_from_slice(&entry);
        let mut grown = previous;
        grown.push(entry[0]);
        dictionary.push(grown);
        previous = entry;
    }

    Ok(out)
}
