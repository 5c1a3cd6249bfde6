//! `window.localStorage`.

use gru_glue_core::string::write_string_ret;

use super::sig::*;
use super::{object, optional_handle, string_arg, value, Args, Binding, Ret};
use crate::host::dom::Window;
use crate::host::js;
use crate::host::storage::LocalStorage;
use crate::host::Embedder;

pub(super) static BINDINGS: &[Binding] = &[
    Binding::new("Window.localStorage", "localStorage", I, I, local_storage).catching(),
    Binding::new("Storage.getItem", "getItem", IIII, NONE, get_item).catching(),
    Binding::new("Storage.setItem", "setItem", IIIII, NONE, set_item).catching(),
    Binding::new("Storage.removeItem", "removeItem", III, NONE, remove_item).catching(),
    Binding::new("Storage.clear", "clear", I, NONE, clear).catching(),
];

fn local_storage(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    let window = value(cx, args.handle(0)?);
    object::<Window>(cx, args.handle(0)?)?;
    let storage = js::property(&window, "localStorage");
    Ok(optional_handle(cx, storage))
}

fn receiver(cx: &mut dyn Embedder, args: &Args<'_>, i: usize) -> anyhow::Result<()> {
    object::<LocalStorage>(cx, args.handle(i)?)?;
    Ok(())
}

/// `(retptr, storage, key_ptr, key_len)`; a missing key writes `null`.
fn get_item(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    receiver(cx, args, 1)?;
    let key = string_arg(cx, args, 2)?;
    let item = cx.host().storage.get_item(&key).map(str::to_string);
    write_string_ret(cx, args.u32(0)?, item.as_deref())?;
    Ok(Ret::Unit)
}

fn set_item(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    receiver(cx, args, 0)?;
    let key = string_arg(cx, args, 1)?;
    let item = string_arg(cx, args, 3)?;
    cx.host().storage.set_item(&key, &item)?;
    Ok(Ret::Unit)
}

fn remove_item(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    receiver(cx, args, 0)?;
    let key = string_arg(cx, args, 1)?;
    cx.host().storage.remove_item(&key);
    Ok(Ret::Unit)
}

fn clear(cx: &mut dyn Embedder, args: &Args<'_>) -> anyhow::Result<Ret> {
    receiver(cx, args, 0)?;
    cx.host().storage.clear();
    Ok(Ret::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::testing::TestCx;
    use wasmtime::Val;

    fn storage(cx: &mut TestCx) -> Val {
        let window = cx.window();
        let Ret::I32(h) = cx.call("Window.localStorage", &[window]).unwrap() else { panic!() };
        assert_ne!(h, 0);
        Val::I32(h)
    }

    fn get(cx: &mut TestCx, storage: &Val, key: &str) -> Option<String> {
        let slot = cx.retptr();
        let (kp, kl) = cx.text(key);
        cx.call("Storage.getItem", &[slot.clone(), storage.clone(), kp, kl]).unwrap();
        cx.sandbox.read_string_ret(slot.i32().unwrap() as u32).unwrap()
    }

    fn set(cx: &mut TestCx, storage: &Val, key: &str, item: &str) {
        let (kp, kl) = cx.text(key);
        let (vp, vl) = cx.text(item);
        cx.call("Storage.setItem", &[storage.clone(), kp, kl, vp, vl]).unwrap();
    }

    #[test]
    fn test_get_set_remove() {
        let mut cx = TestCx::new();
        let ls = storage(&mut cx);
        assert_eq!(get(&mut cx, &ls, "volume"), None);
        set(&mut cx, &ls, "volume", "0.8");
        assert_eq!(get(&mut cx, &ls, "volume").as_deref(), Some("0.8"));

        let (kp, kl) = cx.text("volume");
        cx.call("Storage.removeItem", &[ls.clone(), kp, kl]).unwrap();
        assert_eq!(get(&mut cx, &ls, "volume"), None);
        set(&mut cx, &ls, "a", "1");
        cx.call("Storage.clear", &[ls]).unwrap();
        assert!(cx.host.storage.is_empty());
    }

    #[test]
    fn test_quota_is_a_caught_error() {
        let mut config = HostConfig::default();
        config.storage.quota = 8;
        let mut cx = TestCx::with_config(config);
        let ls = storage(&mut cx);
        set(&mut cx, &ls, "key", "12345");
        assert!(cx.sandbox.exceptions().is_empty());
        set(&mut cx, &ls, "key2", "x");
        let err = cx.sandbox.take_exception().unwrap();
        assert!(err.debug_string().starts_with("QuotaExceededError"));
        assert_eq!(get(&mut cx, &ls, "key").as_deref(), Some("12345"));
    }

    #[test]
    fn test_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostConfig::default();
        config.storage.file = Some(dir.path().join("save").join("storage.json"));
        {
            let mut cx = TestCx::with_config(config.clone());
            let ls = storage(&mut cx);
            set(&mut cx, &ls, "level", "3");
        }
        let mut cx = TestCx::with_config(config);
        let ls = storage(&mut cx);
        assert_eq!(get(&mut cx, &ls, "level").as_deref(), Some("3"));
    }

    #[test]
    fn test_wrong_receiver_traps() {
        let mut cx = TestCx::new();
        let window = cx.window();
        let (kp, kl) = cx.text("k");
        let (vp, vl) = cx.text("v");
        assert!(cx.call("Storage.setItem", &[window, kp, kl, vp, vl]).is_err());
    }
}
