/// Bytes shown per dump line.
const LINE_LEN: usize = 16;

/// Hex dump with a printable-ASCII column, 16 bytes per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + bytes.len() / LINE_LEN * 8);
    for line in bytes.chunks(LINE_LEN) {
        out.push('\t');
        for i in 0..LINE_LEN {
            match line.get(i) {
                Some(b) => out.push_str(&format!("{b:02x} ")),
                None => out.push_str("   "),
            }
        }
        out.push_str("| ");
        out.extend(line.iter().map(|&b| {
            if (32..127).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
