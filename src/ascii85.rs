//! Ascii85 (btoa-style) codec, framed `<~ ... ~>`.
//!
//! A vendored pure-function utility, not kernel logic: the serializer is the
//! only caller. Matches the Adobe/btoa dialect (`z` shorthand for an
//! all-zero 4-byte group, `<~`/`~>` delimiters).

pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 5 / 4 + 4);
    out.push_str("<~");
    for chunk in bytes.chunks(4) {
        if chunk.len() == 4 && chunk == [0, 0, 0, 0] {
            out.push('z');
            continue;
        }
        let mut buf = [0u8; 4];
        buf[..chunk.len()].copy_from_slice(chunk);
        let n = u32::from_be_bytes(buf) as u64;
        let mut digits = [0u8; 5];
        let mut rem = n;
        for i in (0..5).rev() {
            digits[i] = (rem % 85) as u8;
            rem /= 85;
        }
        let encoded_len = chunk.len() + 1;
        for &d in &digits[..encoded_len] {
            out.push((d + 33) as char);
        }
    }
    out.push_str("~>");
    out
}

pub fn decode(framed: &str) -> Result<Vec<u8>, String> {
    let inner = framed
        .strip_prefix("<~")
        .ok_or_else(|| "missing <~ prefix".to_string())?
        .strip_suffix("~>")
        .ok_or_else(|| "missing ~> suffix".to_string())?;

    let mut out = Vec::new();
    let mut group = Vec::with_capacity(5);
    let flush = |group: &mut Vec<u8>, out: &mut Vec<u8>| -> Result<(), String> {
        if group.is_empty() {
            return Ok(());
        }
        let len = group.len();
        if len == 1 {
            return Err("ascii85 group of length 1 is invalid".to_string());
        }
        let mut padded = group.clone();
        padded.resize(5, 84); // pad with 'u'-33 == 84, the max digit
        let mut n: u64 = 0;
        for &d in &padded {
            n = n * 85 + d as u64;
        }
        let bytes = (n as u32).to_be_bytes();
        out.extend_from_slice(&bytes[..len - 1]);
        group.clear();
        Ok(())
    };

    for c in inner.chars() {
        if c == 'z' {
            if !group.is_empty() {
                return Err("unexpected 'z' inside a group".to_string());
            }
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        let code = c as u32;
        if !(33..=117).contains(&code) {
            return Err(format!("invalid ascii85 character {c:?}"));
        }
        group.push((code - 33) as u8);
        if group.len() == 5 {
            flush(&mut group, &mut out)?;
        }
    }
    flush(&mut group, &mut out)?;
    Ok(out)
}
