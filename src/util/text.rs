use std::borrow::Cow;

/// Longest subject line we hand to the mail transport, in characters.
pub const MAX_HEADER_CHARS: usize = 200;

/// Returns true for bytes that must never reach a mail header.
///
/// Covers C0 controls (including CR/LF, which would allow header injection
/// from a hostile feed title), ESC and DEL.
fn is_control_byte(b: u8) -> bool {
    b < 0x20 || b == 0x7f
}

/// Strips ANSI escape sequences and control characters from a string.
///
/// CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`) sequences are removed
/// whole; any other control byte is replaced by a single space so that words
/// separated by a newline stay separated.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
///
/// # Examples
///
/// ```
/// use feedmailer::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("plain"), "plain");
/// assert_eq!(strip_control_chars("a\r\nBcc: x@y"), "a  Bcc: x@y");
/// assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    if !bytes.iter().any(|&b| is_control_byte(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameter/intermediate bytes through the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: skip through BEL or ST (ESC \)
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_control_byte(b) {
            out.push(' ');
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_control_byte(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only break on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

/// Turns arbitrary feed text into a single header-safe line.
///
/// Control characters are stripped, whitespace runs collapse to one space,
/// the result is trimmed and capped at `max_chars` characters (ending in
/// `...` when cut).
pub fn header_line(s: &str, max_chars: usize) -> String {
    let stripped = strip_control_chars(s);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    if max_chars <= 3 {
        return collapsed.chars().take(max_chars).collect();
    }

    let mut out: String = collapsed.chars().take(max_chars - 3).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}
