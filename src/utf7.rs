//! Modified UTF-7 mailbox name encoding (RFC 3501 §5.1.3)
//!
//! Printable US-ASCII except `&` represents itself; `&` shifts into
//! modified base64 over UTF-16BE code units and `-` shifts back; a bare
//! `&` is spelled `&-`. Used for every mailbox name on the wire unless
//! the server has enabled `UTF8=ACCEPT`.

use base64::Engine as _;
use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::NO_PAD;

fn engine() -> GeneralPurpose {
    GeneralPurpose::new(&base64::alphabet::IMAP_MUTF7, NO_PAD)
}

/// Decode a modified UTF-7 byte string into Unicode.
///
/// Returns `None` on any malformed input: unterminated shift, bytes
/// outside the printable range, or base64 that does not decode to whole
/// UTF-16BE code units. Superfluous shifts (`&U,BTFw-&ZeVnLIqe-`) are
/// accepted.
#[must_use]
pub fn decode(input: &[u8]) -> Option<String> {
    let engine = engine();
    let mut buffer = Vec::new();
    let mut output = String::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'&' => {
                let start = i;
                loop {
                    i += 1;
                    if i == input.len() {
                        return None;
                    }
                    if input[i] == b'-' {
                        break;
                    }
                }
                if start + 1 == i {
                    output.push('&');
                } else {
                    buffer.clear();
                    engine.decode_vec(&input[start + 1..i], &mut buffer).ok()?;

                    let mut decoder = encoding_rs::UTF_16BE.new_decoder_without_bom_handling();
                    output.reserve(
                        decoder.max_utf8_buffer_length_without_replacement(buffer.len())?,
                    );
                    let (result, _) = decoder.decode_to_string_without_replacement(
                        &buffer,
                        &mut output,
                        true, // last
                    );
                    match result {
                        encoding_rs::DecoderResult::InputEmpty => (),
                        _ => return None,
                    }
                }
            }
            c @ 0x20..=0x25 | c @ 0x27..=0x7e => output.push(c as char),
            _ => return None,
        }
        i += 1;
    }
    Some(output)
}

/// Encode a Unicode mailbox name as modified UTF-7 bytes.
#[must_use]
pub fn encode(input: &str) -> Vec<u8> {
    let engine = engine();
    let mut output = Vec::with_capacity(input.len());
    let mut shifted: Vec<u8> = Vec::new();

    let flush = |shifted: &mut Vec<u8>, output: &mut Vec<u8>| {
        if shifted.is_empty() {
            return;
        }
        output.push(b'&');
        output.extend_from_slice(engine.encode(&shifted).as_bytes());
        output.push(b'-');
        shifted.clear();
    };

    for c in input.chars() {
        match c {
            '&' => {
                flush(&mut shifted, &mut output);
                output.extend_from_slice(b"&-");
            }
            '\x20'..='\x7e' => {
                flush(&mut shifted, &mut output);
                output.push(c as u8);
            }
            other => {
                let mut units = [0u16; 2];
                for unit in other.encode_utf16(&mut units) {
                    shifted.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
    }
    flush(&mut shifted, &mut output);
    output
}
