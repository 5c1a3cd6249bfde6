//! Names of the guest/host boundary.

/// Module every host import lives under.
pub const IMPORT_MODULE: &str = "wbg";

pub const MEMORY: &str = "memory";
pub const MALLOC: &str = "__wbindgen_malloc";
pub const REALLOC: &str = "__wbindgen_realloc";
pub const EXN_STORE: &str = "__wbindgen_exn_store";
pub const START: &str = "__wbindgen_start";
pub const RUN: &str = "run";

/// Function table holding closure destructors.
pub const DESTRUCTOR_TABLE: &str = "__wbindgen_export_2";

pub const TRAMPOLINE_PREFIX: &str = "wasm_bindgen__convert__closures__invoke";

const BINDING_PREFIX: &str = "__wbg_";
const INTRINSIC_PREFIX: &str = "__wbindgen_";
const CLOSURE_WRAPPER: &str = "closure_wrapper";

/// A parsed `wbg` import name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportName<'a> {
    /// `__wbg_<symbol>_<hash>`.
    Binding { symbol: &'a str, hash: Option<&'a str> },
    /// `__wbindgen_<name>`.
    Intrinsic(&'a str),
    /// `__wbindgen_closure_wrapper<N>`.
    ClosureWrapper(u32),
    Other(&'a str),
}

impl ImportName<'_> {
    /// Name the catalogue is keyed by.
    pub fn symbol(&self) -> &str {
        match self {
            ImportName::Binding { symbol, .. } => symbol,
            ImportName::Intrinsic(name) => name,
            ImportName::ClosureWrapper(_) => CLOSURE_WRAPPER,
            ImportName::Other(name) => name,
        }
    }
}

/// 16 lowercase hex digits, the suffix the bindings generator appends.
pub fn is_hash(s: &str) -> bool {
    s.len() == 16 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn parse_import(name: &str) -> ImportName<'_> {
    if let Some(rest) = name.strip_prefix(BINDING_PREFIX) {
        return match rest.rsplit_once('_') {
            Some((symbol, hash)) if is_hash(hash) && !symbol.is_empty() => ImportName::Binding {
                symbol,
                hash: Some(hash),
            },
            _ => ImportName::Binding {
                symbol: rest,
                hash: None,
            },
        };
    }
    if let Some(rest) = name.strip_prefix(INTRINSIC_PREFIX) {
        if let Some(id) = rest.strip_prefix(CLOSURE_WRAPPER) {
            if let Ok(id) = id.parse() {
                return ImportName::ClosureWrapper(id);
            }
        }
        return ImportName::Intrinsic(rest);
    }
    ImportName::Other(name)
}

/// A parsed closure trampoline export name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrampolineName<'a> {
    pub arity: u32,
    pub mutable: bool,
    pub hash: Option<&'a str>,
}

/// `wasm_bindgen__convert__closures__invoke<N>[_mut]__h<hash>`.
pub fn parse_trampoline(name: &str) -> Option<TrampolineName<'_>> {
    let rest = name.strip_prefix(TRAMPOLINE_PREFIX)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let arity = rest[..digits].parse().ok()?;
    let rest = &rest[digits..];
    let (mutable, rest) = match rest.strip_prefix("_mut") {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let hash = match rest.strip_prefix("__h") {
        Some(hash) => Some(hash),
        None if rest.is_empty() => None,
        None => return None,
    };
    Some(TrampolineName {
        arity,
        mutable,
        hash,
    })
}
