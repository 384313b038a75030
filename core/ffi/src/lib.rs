//! C bindings for the Coffer vault engine.
//!
//! Vaults are addressed by integer handles; 0 is never a valid handle and
//! is returned on failure. Functions returning `c_int` use 0 for success
//! and -1 for failure. After any failure the calling thread's error slot
//! holds the reason, readable with `coffer_last_error` and
//! `coffer_last_error_kind`. Every other call clears the slot on entry.
//!
//! Strings and structs handed out by this library are owned by the caller
//! and must be released with the matching `*_free` function.

#![allow(clippy::missing_safety_doc)]

pub mod error;
pub mod runtime;
pub mod types;

use once_cell::sync::Lazy;
use std::ffi::{c_char, c_int, CStr};
use std::path::Path;
use std::ptr;

use coffer_common::{Error, Result, VaultHandle, VaultPath};
use coffer_vault::{listing_to_json, VaultManager, VaultOperations};
use tracing_subscriber::EnvFilter;

use crate::runtime::get_runtime;
use crate::types::{free_c_string, to_c_string, CofferVaultInfo};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "COFFER_LOG";

static MANAGER: Lazy<VaultManager> = Lazy::new(VaultManager::new);

/// Run one boundary call: clear the error slot, record any failure.
fn ffi_call<T>(on_error: T, f: impl FnOnce() -> Result<T>) -> T {
    error::clear_last_error();
    match f() {
        Ok(value) => value,
        Err(e) => {
            error::set_last_error(&e);
            on_error
        }
    }
}

/// Run an async engine call on the global runtime.
fn block_on<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    get_runtime()?.block_on(fut)
}

unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::InvalidArgument(format!("{} is null", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| Error::InvalidArgument(format!("{} is not valid UTF-8", name)))
}

unsafe fn vault_path_arg(ptr: *const c_char, name: &str) -> Result<VaultPath> {
    VaultPath::parse(str_arg(ptr, name)?)
}

fn status(result: Result<()>) -> Result<c_int> {
    result.map(|()| 0)
}

/// Initialize logging and the runtime.
///
/// Safe to call more than once. The log filter is read from `COFFER_LOG`
/// and defaults to `info`.
#[no_mangle]
pub extern "C" fn coffer_init() -> c_int {
    ffi_call(-1, || {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

        get_runtime()?;
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "Coffer initialized");
        Ok(0)
    })
}

/// Library version.
///
/// Returns a pointer to a static string. Do not free.
#[no_mangle]
pub extern "C" fn coffer_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    error::clear_last_error();
    VERSION.as_ptr() as *const c_char
}

/// Create a new vault in `path` protected by `password`.
///
/// # Safety
/// - `path` and `password` must be null-terminated UTF-8 strings
/// - Returns a handle to be closed with `coffer_vault_close`, or 0 on error
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_create(
    path: *const c_char,
    password: *const c_char,
) -> u64 {
    ffi_call(0, || {
        let path = str_arg(path, "path")?;
        let password = str_arg(password, "password")?;
        let handle = block_on(MANAGER.create(Path::new(path), password.as_bytes()))?;
        Ok(handle.as_raw())
    })
}

/// Open the vault in `path` with `password`.
///
/// # Safety
/// - `path` and `password` must be null-terminated UTF-8 strings
/// - Returns a handle to be closed with `coffer_vault_close`, or 0 on error
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_open(path: *const c_char, password: *const c_char) -> u64 {
    ffi_call(0, || {
        let path = str_arg(path, "path")?;
        let password = str_arg(password, "password")?;
        let handle = block_on(MANAGER.open(Path::new(path), password.as_bytes()))?;
        Ok(handle.as_raw())
    })
}

/// Close a vault. The handle is invalid afterwards.
#[no_mangle]
pub extern "C" fn coffer_vault_close(handle: u64) -> c_int {
    ffi_call(-1, || {
        status(block_on(MANAGER.close(VaultHandle::from_raw(handle))))
    })
}

/// Summary of an open vault.
///
/// Returns null on error. Free the result with `coffer_vault_info_free`.
#[no_mangle]
pub extern "C" fn coffer_vault_info(handle: u64) -> *mut CofferVaultInfo {
    ffi_call(ptr::null_mut(), || {
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        let info = block_on(session.info())?;
        Ok(Box::into_raw(Box::new(CofferVaultInfo::from_info(info)?)))
    })
}

/// Free a struct returned by `coffer_vault_info`.
///
/// # Safety
/// - `info` must be null or a pointer returned by `coffer_vault_info`
/// - The pointer is invalid after this call
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_info_free(info: *mut CofferVaultInfo) {
    if !info.is_null() {
        drop(Box::from_raw(info));
    }
}

/// List a directory as a JSON array sorted by name.
///
/// Each element is `{"name": ..., "kind": "file"|"directory", "size": ...}`.
///
/// # Safety
/// - `path` must be a null-terminated UTF-8 string (`"/"` for the root)
/// - Returns null on error; free the result with `coffer_string_free`
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_list(handle: u64, path: *const c_char) -> *mut c_char {
    ffi_call(ptr::null_mut(), || {
        let path = vault_path_arg(path, "path")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        let entries = block_on(VaultOperations::new(&session).list(&path))?;
        to_c_string(listing_to_json(&entries)?)
    })
}

/// Encrypt the local file `local_path` into the vault at `vault_path`.
///
/// # Safety
/// - `local_path` and `vault_path` must be null-terminated UTF-8 strings
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_add_file(
    handle: u64,
    local_path: *const c_char,
    vault_path: *const c_char,
) -> c_int {
    ffi_call(-1, || {
        let local = str_arg(local_path, "local_path")?;
        let target = vault_path_arg(vault_path, "vault_path")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        status(block_on(
            VaultOperations::new(&session).add_file(Path::new(local), &target),
        ))
    })
}

/// Decrypt the vault file `vault_path` to the local file `local_path`.
///
/// An existing local file is replaced.
///
/// # Safety
/// - `vault_path` and `local_path` must be null-terminated UTF-8 strings
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_extract_file(
    handle: u64,
    vault_path: *const c_char,
    local_path: *const c_char,
) -> c_int {
    ffi_call(-1, || {
        let source = vault_path_arg(vault_path, "vault_path")?;
        let local = str_arg(local_path, "local_path")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        status(block_on(
            VaultOperations::new(&session).extract_file(&source, Path::new(local)),
        ))
    })
}

/// Create a directory, including missing parents.
///
/// # Safety
/// - `vault_path` must be a null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_mkdir(handle: u64, vault_path: *const c_char) -> c_int {
    ffi_call(-1, || {
        let path = vault_path_arg(vault_path, "vault_path")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        status(block_on(VaultOperations::new(&session).mkdir(&path)))
    })
}

/// Remove a file or an empty directory.
///
/// # Safety
/// - `vault_path` must be a null-terminated UTF-8 string
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_remove(handle: u64, vault_path: *const c_char) -> c_int {
    ffi_call(-1, || {
        let path = vault_path_arg(vault_path, "vault_path")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        status(block_on(VaultOperations::new(&session).remove(&path)))
    })
}

/// Change the vault password.
///
/// # Safety
/// - `old_password` and `new_password` must be null-terminated UTF-8 strings
#[no_mangle]
pub unsafe extern "C" fn coffer_vault_change_password(
    handle: u64,
    old_password: *const c_char,
    new_password: *const c_char,
) -> c_int {
    ffi_call(-1, || {
        let old = str_arg(old_password, "old_password")?;
        let new = str_arg(new_password, "new_password")?;
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        status(block_on(
            session.change_password(old.as_bytes(), new.as_bytes()),
        ))
    })
}

/// Run a full integrity check of the vault.
#[no_mangle]
pub extern "C" fn coffer_vault_verify(handle: u64) -> c_int {
    ffi_call(-1, || {
        let session = MANAGER.get(VaultHandle::from_raw(handle))?;
        let report = block_on(session.verify())?;
        tracing::debug!(
            files = report.files_checked,
            bytes = report.bytes_checked,
            "Verification finished"
        );
        Ok(0)
    })
}

/// Message of the calling thread's last error, consuming it.
///
/// Returns null if there is none. Free the result with
/// `coffer_string_free`.
#[no_mangle]
pub extern "C" fn coffer_last_error() -> *mut c_char {
    error::take_last_error()
        .and_then(|e| to_c_string(e.message.replace('\0', " ")).ok())
        .unwrap_or(ptr::null_mut())
}

/// Kind code of the calling thread's last error, or 0 if there is none.
///
/// Does not consume the error.
#[no_mangle]
pub extern "C" fn coffer_last_error_kind() -> c_int {
    error::last_error_kind().map(|k| k.code()).unwrap_or(0)
}

/// Free a string returned by this library.
///
/// # Safety
/// - `s` must be null or a pointer returned by a `coffer_*` function
/// - The pointer is invalid after this call
#[no_mangle]
pub unsafe extern "C" fn coffer_string_free(s: *mut c_char) {
    free_c_string(s);
}
