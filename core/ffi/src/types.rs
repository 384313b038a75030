//! Types that cross the C boundary.

use std::ffi::{c_char, CString};
use std::ptr;

use coffer_common::{Error, Result};
use coffer_vault::VaultInfo;

/// Vault summary returned by `coffer_vault_info`.
///
/// Owned by the caller; release it with `coffer_vault_info_free`.
#[repr(C)]
pub struct CofferVaultInfo {
    /// Vault identifier (null-terminated).
    pub vault_id: *mut c_char,
    /// Root path of the vault on disk (null-terminated).
    pub root_path: *mut c_char,
    /// Number of files in the vault.
    pub file_count: u64,
    /// Sum of plaintext file sizes in bytes.
    pub total_size: u64,
    /// Committed revision, incremented by every mutation.
    pub version: u64,
}

impl CofferVaultInfo {
    pub(crate) fn from_info(info: VaultInfo) -> Result<Self> {
        let vault_id = to_c_string(info.vault_id)?;
        let root_path = match to_c_string(info.root_path) {
            Ok(p) => p,
            Err(e) => {
                // SAFETY: `vault_id` was produced by `CString::into_raw` above.
                unsafe { free_c_string(vault_id) };
                return Err(e);
            }
        };
        Ok(Self {
            vault_id,
            root_path,
            file_count: info.file_count,
            total_size: info.total_size,
            version: info.version,
        })
    }
}

impl Drop for CofferVaultInfo {
    fn drop(&mut self) {
        // SAFETY: both fields are either null or came from `CString::into_raw`.
        unsafe {
            free_c_string(self.vault_id);
            free_c_string(self.root_path);
        }
        self.vault_id = ptr::null_mut();
        self.root_path = ptr::null_mut();
    }
}

/// Convert a Rust string into a caller-owned C string.
pub(crate) fn to_c_string(s: String) -> Result<*mut c_char> {
    CString::new(s)
        .map(CString::into_raw)
        .map_err(|_| Error::InvalidArgument("String contains an interior NUL byte".to_string()))
}

/// Release a string created by [`to_c_string`]. Null is ignored.
///
/// # Safety
/// `s` must be null or a pointer returned by [`to_c_string`] that has not
/// been freed yet.
pub(crate) unsafe fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
