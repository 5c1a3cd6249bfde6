use crate::error::{GlueError, Result};
use crate::guest::Guest;

/// Length in UTF-16 code units, the unit the encoder sizes its first
/// allocation in.
pub fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Copy `s` into freshly allocated guest memory.
///
/// Returns the pointer; the byte count is left in `vector_len` for the
/// caller to pick up before the next encode.
pub fn pass_string<G: Guest + ?Sized>(g: &mut G, s: &str) -> Result<u32> {
    if !g.has_realloc() {
        let len = s.len() as u32;
        let ptr = g.malloc(len, 1)?;
        g.uint8_mut().write(ptr, s.as_bytes())?;
        g.glue().vector_len = len;
        return Ok(ptr);
    }

    let len = utf16_len(s);
    let mut ptr = g.malloc(len, 1)?;
    let ascii = s.bytes().take_while(u8::is_ascii).count();
    g.uint8_mut().write(ptr, &s.as_bytes()[..ascii])?;

    let mut offset = ascii as u32;
    if ascii < s.len() {
        let rest = &s[ascii..];
        let grown = offset + utf16_len(rest) * 3;
        ptr = g.realloc(ptr, len, grown, 1)?;
        g.uint8_mut().write(ptr + offset, rest.as_bytes())?;
        offset += rest.len() as u32;
    }

    g.glue().vector_len = offset;
    Ok(ptr)
}

/// Strict UTF-8 decode of `(ptr, len)`.
pub fn string_from_guest<G: Guest + ?Sized>(g: &mut G, ptr: u32, len: u32) -> Result<String> {
    let bytes = g.uint8().slice(ptr, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|source| GlueError::MalformedString { ptr, len, source })
}

pub fn bytes_from_guest<G: Guest + ?Sized>(g: &mut G, ptr: u32, len: u32) -> Result<Vec<u8>> {
    Ok(g.uint8().slice(ptr, len)?.to_vec())
}

pub fn f32_array_from_guest<G: Guest + ?Sized>(g: &mut G, ptr: u32, len: u32) -> Result<Vec<f32>> {
    g.float32().read_vec(ptr, len)
}

/// Write an optional string as a `(ptr, len)` record at `retptr`.
pub fn write_string_ret<G: Guest + ?Sized>(g: &mut G, retptr: u32, s: Option<&str>) -> Result<()> {
    let (ptr, len) = match s {
        Some(s) => {
            let ptr = pass_string(g, s)?;
            (ptr, g.glue().vector_len)
        }
        None => (0, 0),
    };
    let base = retptr as usize / 4;
    let mut ints = g.int32_mut();
    ints.set(base, ptr as i32)?;
    ints.set(base + 1, len as i32)?;
    Ok(())
}

/// Write an optional number: `is_some` as i32 at `retptr`, the value as f64
/// at `retptr + 8`.
pub fn write_number_ret<G: Guest + ?Sized>(g: &mut G, retptr: u32, n: Option<f64>) -> Result<()> {
    g.float64_mut().set(retptr as usize / 8 + 1, n.unwrap_or(0.0))?;
    g.int32_mut().set(retptr as usize / 4, n.is_some() as i32)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{VecMemory, PAGE_SIZE};
    use crate::sandbox::Sandbox;

    #[test]
    fn test_ascii_fast_path() {
        let mut sb = Sandbox::new();
        let ptr = pass_string(&mut sb, "hello").unwrap();
        assert_eq!(sb.glue_ref().vector_len, 5);
        assert_eq!(sb.realloc_calls(), 0);
        assert_eq!(sb.read_bytes(ptr, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_non_ascii_reallocates_once() {
        let mut sb = Sandbox::new();
        let ptr = pass_string(&mut sb, "héllo").unwrap();
        assert_eq!(sb.realloc_calls(), 1);
        assert_eq!(sb.glue_ref().vector_len, 6);
        assert_eq!(sb.read_bytes(ptr, 6).unwrap(), "héllo".as_bytes());
    }

    #[test]
    fn test_bytes_are_not_decoded() {
        let mut sb = Sandbox::new();
        let ptr = sb.write_bytes(&[0xff, 0x00, 0xfe], 1).unwrap();
        assert_eq!(bytes_from_guest(&mut sb, ptr, 3).unwrap(), vec![0xff, 0x00, 0xfe]);
        assert!(string_from_guest(&mut sb, ptr, 3).is_err());
        assert!(matches!(
            bytes_from_guest(&mut sb, u32::MAX - 2, 8),
            Err(GlueError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_round_trip_mixed_content() {
        let mut sb = Sandbox::new();
        for s in ["", "plain", "ünïcödé", "日本語テキスト", "emoji 🦀 crab", "a\u{0}b"] {
            let ptr = pass_string(&mut sb, s).unwrap();
            let len = sb.glue_ref().vector_len;
            assert_eq!(string_from_guest(&mut sb, ptr, len).unwrap(), s);
        }
    }

    #[test]
    fn test_without_realloc_allocates_exactly() {
        let mut sb = Sandbox::new().without_realloc();
        let before = sb.malloc_calls();
        let ptr = pass_string(&mut sb, "naïve").unwrap();
        assert_eq!(sb.malloc_calls(), before + 1);
        assert_eq!(sb.glue_ref().vector_len, "naïve".len() as u32);
        assert_eq!(string_from_guest(&mut sb, ptr, 6).unwrap(), "naïve");
    }

    #[test]
    fn test_malformed_string_is_fatal() {
        let mut sb = Sandbox::new();
        let ptr = sb.write_bytes(&[0x66, 0xC3, 0x28], 1).unwrap();
        assert!(matches!(
            string_from_guest(&mut sb, ptr, 3),
            Err(GlueError::MalformedString { len: 3, .. })
        ));
    }

    #[test]
    fn test_decode_out_of_bounds() {
        let mut sb = Sandbox::new();
        assert!(matches!(
            string_from_guest(&mut sb, PAGE_SIZE as u32 - 1, 8),
            Err(GlueError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_encode_across_growth() {
        let mut sb = Sandbox::with_memory(VecMemory::new(1));
        let _ = sb.uint8();
        let rebuilds = sb.glue_ref().views.rebuilds();
        let long = "é".repeat(PAGE_SIZE / 2);
        let ptr = pass_string(&mut sb, &long).unwrap();
        assert!(sb.vec_memory().pages() > 1);
        assert!(sb.glue_ref().views.rebuilds() > rebuilds);
        let len = sb.glue_ref().vector_len;
        assert_eq!(string_from_guest(&mut sb, ptr, len).unwrap(), long);
    }

    #[test]
    fn test_string_ret_records() {
        let mut sb = Sandbox::new();
        let retptr = sb.malloc(8, 4).unwrap();
        write_string_ret(&mut sb, retptr, Some("info log")).unwrap();
        assert_eq!(sb.read_string_ret(retptr).unwrap().as_deref(), Some("info log"));

        write_string_ret(&mut sb, retptr, None).unwrap();
        assert_eq!(sb.read_i32(retptr).unwrap(), 0);
        assert_eq!(sb.read_i32(retptr + 4).unwrap(), 0);
    }

    #[test]
    fn test_number_ret_record() {
        let mut sb = Sandbox::new();
        let retptr = sb.malloc(16, 8).unwrap();
        write_number_ret(&mut sb, retptr, Some(2.5)).unwrap();
        assert_eq!(sb.read_i32(retptr).unwrap(), 1);
        assert_eq!(sb.read_f64(retptr + 8).unwrap(), 2.5);

        write_number_ret(&mut sb, retptr, None).unwrap();
        assert_eq!(sb.read_i32(retptr).unwrap(), 0);
        assert_eq!(sb.read_f64(retptr + 8).unwrap(), 0.0);
    }

    #[test]
    fn test_f32_array() {
        let mut sb = Sandbox::new();
        let m: [f32; 4] = [1.0, 0.0, -1.0, 0.5];
        let ptr = sb.write_bytes(bytemuck::cast_slice(&m), 4).unwrap();
        assert_eq!(f32_array_from_guest(&mut sb, ptr, 4).unwrap(), m);
    }
}
