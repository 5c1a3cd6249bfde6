use std::cell::RefCell;
use std::rc::Rc;

use gru_glue_core::string::bytes_from_guest;
use gru_glue_core::{Guest, HostError, HostRef, HostValue};

/// Largest request `crypto.getRandomValues` accepts.
pub const MAX_RANDOM_BYTES: usize = 65_536;

/// Host-owned bytes (`ArrayBuffer`).
#[derive(Debug, Default)]
pub struct ArrayBuffer {
    data: RefCell<Vec<u8>>,
}

impl ArrayBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            data: RefCell::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

/// `WebAssembly.Memory` of the running guest.
#[derive(Debug, Default)]
pub struct GuestMemory;

/// `memory.buffer`: the guest's linear memory viewed as an `ArrayBuffer`.
#[derive(Debug, Default)]
pub struct GuestBuffer;

#[derive(Debug, Clone)]
pub enum Backing {
    Host(Rc<ArrayBuffer>),
    Guest,
}

/// A `Uint8Array` window onto host bytes or onto guest linear memory.
///
/// Guest-backed arrays read and write through the cached memory views, so
/// they always see the current buffer.
#[derive(Debug, Clone)]
pub struct Uint8Array {
    backing: Backing,
    offset: u32,
    len: u32,
}

impl Uint8Array {
    pub fn with_length(len: u32) -> Self {
        Self::from_bytes(vec![0; len as usize])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u32;
        Self {
            backing: Backing::Host(Rc::new(ArrayBuffer::new(bytes))),
            offset: 0,
            len,
        }
    }

    /// `new Uint8Array(buffer, offset, len)`.
    ///
    /// `memory_len` is the current size of guest memory, used when `buffer`
    /// is `memory.buffer`.
    pub fn view(
        buffer: &HostValue,
        offset: u32,
        len: Option<u32>,
        memory_len: usize,
    ) -> Result<Self, HostError> {
        let obj = buffer.as_host_ref().ok_or_else(|| {
            HostError::type_error(format!("{} is not an ArrayBuffer", buffer.type_name()))
        })?;
        let (backing, size) = if let Some(ab) = obj.downcast_rc::<ArrayBuffer>() {
            let size = ab.len();
            (Backing::Host(ab), size)
        } else if obj.is::<GuestBuffer>() {
            (Backing::Guest, memory_len)
        } else {
            return Err(HostError::type_error(format!(
                "{} is not an ArrayBuffer",
                obj.class()
            )));
        };
        if offset as usize > size {
            return Err(HostError::range(format!(
                "start offset {offset} is outside the bounds of the buffer"
            )));
        }
        let len = match len {
            Some(len) if offset as usize + len as usize > size => {
                return Err(HostError::range(format!("invalid typed array length: {len}")));
            }
            Some(len) => len,
            None => (size - offset as usize) as u32,
        };
        Ok(Self {
            backing,
            offset,
            len,
        })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn is_guest_backed(&self) -> bool {
        matches!(self.backing, Backing::Guest)
    }

    /// `.buffer`.
    pub fn buffer(&self) -> HostValue {
        match &self.backing {
            Backing::Host(ab) => HostValue::Object(HostRef::from_rc(Rc::clone(ab))),
            Backing::Guest => HostValue::object(GuestBuffer),
        }
    }

    /// `.subarray(begin, end)`, clamped the way JavaScript clamps it.
    pub fn subarray(&self, begin: u32, end: u32) -> Self {
        let begin = begin.min(self.len);
        let end = end.clamp(begin, self.len);
        Self {
            backing: self.backing.clone(),
            offset: self.offset + begin,
            len: end - begin,
        }
    }

    pub fn read<G: Guest + ?Sized>(&self, g: &mut G) -> gru_glue_core::Result<Vec<u8>> {
        match &self.backing {
            Backing::Host(ab) => {
                let data = ab.data.borrow();
                let start = self.offset as usize;
                let end = start + self.len as usize;
                data.get(start..end)
                    .map(<[u8]>::to_vec)
                    .ok_or(gru_glue_core::GlueError::OutOfBounds {
                        offset: start,
                        len: self.len as usize,
                        size: data.len(),
                    })
            }
            Backing::Guest => bytes_from_guest(g, self.offset, self.len),
        }
    }

    /// `.set(bytes, at)`.
    pub fn write<G: Guest + ?Sized>(
        &self,
        g: &mut G,
        at: u32,
        bytes: &[u8],
    ) -> Result<(), WriteError> {
        if at as usize + bytes.len() > self.len as usize {
            return Err(WriteError::Range(HostError::range("offset is out of bounds")));
        }
        let start = (self.offset + at) as usize;
        match &self.backing {
            Backing::Host(ab) => {
                let mut data = ab.data.borrow_mut();
                let size = data.len();
                let dest = data.get_mut(start..start + bytes.len()).ok_or(
                    gru_glue_core::GlueError::OutOfBounds {
                        offset: start,
                        len: bytes.len(),
                        size,
                    },
                )?;
                dest.copy_from_slice(bytes);
            }
            Backing::Guest => g.uint8_mut().write(start as u32, bytes)?,
        }
        Ok(())
    }
}

/// Why a typed array write failed: a guest-visible `RangeError`, or a fault
/// in the marshalling layer.
#[derive(Debug)]
pub enum WriteError {
    Range(HostError),
    Glue(gru_glue_core::GlueError),
}

impl From<gru_glue_core::GlueError> for WriteError {
    fn from(e: gru_glue_core::GlueError) -> Self {
        WriteError::Glue(e)
    }
}

impl From<WriteError> for anyhow::Error {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Range(e) => e.into(),
            WriteError::Glue(e) => e.into(),
        }
    }
}

/// Bytes of anything `Uint8Array.set` or `new Uint8Array(x)` accepts as a
/// source: another typed array or an array of numbers.
pub fn source_bytes<G: Guest + ?Sized>(g: &mut G, value: &HostValue) -> anyhow::Result<Vec<u8>> {
    if let Some(array) = value.downcast::<Uint8Array>() {
        return Ok(array.read(g)?);
    }
    if let HostValue::Array(items) = value {
        return Ok(items
            .borrow()
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as i64 as u8)
            .collect());
    }
    Err(HostError::type_error(format!("{} is not array-like", value.type_name())).into())
}

/// `crypto.getRandomValues(array)`.
pub fn fill_random<G: Guest + ?Sized>(g: &mut G, array: &Uint8Array) -> anyhow::Result<()> {
    if array.len() as usize > MAX_RANDOM_BYTES {
        return Err(HostError::quota_exceeded(format!(
            "requested {} random bytes, at most {MAX_RANDOM_BYTES} are allowed",
            array.len()
        ))
        .into());
    }
    let mut bytes = vec![0u8; array.len() as usize];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| anyhow::anyhow!("operating system RNG failed: {e}"))?;
    array.write(g, 0, &bytes)?;
    Ok(())
}
