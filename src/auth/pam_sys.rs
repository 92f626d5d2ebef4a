//! Minimal raw PAM bindings, reduced to the calls the Authenticator
//! needs: `pam_start`, `pam_authenticate`, `pam_acct_mgmt`, `pam_end`.
//! This is the crate's other permitted unsafe boundary besides
//! `system`; everything above `PamContext` is safe.

use super::converse::{Converser, MessageStyle};
use crate::common::Error;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

#[repr(C)]
struct PamMessage {
    msg_style: c_int,
    msg: *const c_char,
}

#[repr(C)]
struct PamResponse {
    resp: *mut c_char,
    resp_retcode: c_int,
}

#[repr(C)]
struct PamConv {
    conv: extern "C" fn(
        num_msg: c_int,
        msg: *mut *const PamMessage,
        resp: *mut *mut PamResponse,
        appdata_ptr: *mut c_void,
    ) -> c_int,
    appdata_ptr: *mut c_void,
}

#[allow(non_camel_case_types)]
type pam_handle_t = c_void;

const PAM_SUCCESS: c_int = 0;
const PAM_PROMPT_ECHO_OFF: c_int = 1;
const PAM_PROMPT_ECHO_ON: c_int = 2;
const PAM_ERROR_MSG: c_int = 3;
const PAM_TEXT_INFO: c_int = 4;
const PAM_SILENT: c_int = 0x8000;

extern "C" {
    fn pam_start(
        service_name: *const c_char,
        user: *const c_char,
        pam_conversation: *const PamConv,
        pamh: *mut *mut pam_handle_t,
    ) -> c_int;
    fn pam_end(pamh: *mut pam_handle_t, pam_status: c_int) -> c_int;
    fn pam_authenticate(pamh: *mut pam_handle_t, flags: c_int) -> c_int;
    fn pam_acct_mgmt(pamh: *mut pam_handle_t, flags: c_int) -> c_int;
    fn pam_strerror(pamh: *mut pam_handle_t, errnum: c_int) -> *const c_char;
}

extern "C" fn conversation_trampoline(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int {
    // SAFETY: `appdata_ptr` was set from a live `&dyn Converser`
    // reference for the duration of the surrounding PAM call, and
    // `msg`/`resp` follow the PAM conversation ABI contract: `msg` is
    // an array of `num_msg` valid pointers, `resp` is an out
    // parameter this function must populate with a `malloc`'d array.
    unsafe {
        if appdata_ptr.is_null() || msg.is_null() || resp.is_null() {
            return 1; // PAM_CONV_ERR
        }
        let converser = &*(appdata_ptr as *const &dyn Converser);
        let count = num_msg as usize;
        let responses = libc::calloc(count, std::mem::size_of::<PamResponse>()) as *mut PamResponse;
        if responses.is_null() {
            return 1;
        }
        for i in 0..count {
            let m = &**msg.add(i);
            let text = CStr::from_ptr(m.msg).to_string_lossy().into_owned();
            let style = match m.msg_style & !PAM_SILENT {
                PAM_PROMPT_ECHO_OFF => MessageStyle::EchoOffPrompt,
                PAM_PROMPT_ECHO_ON => MessageStyle::EchoOnPrompt,
                PAM_ERROR_MSG => MessageStyle::Error,
                PAM_TEXT_INFO => MessageStyle::Info,
                _ => MessageStyle::Info,
            };
            let reply = converser.handle_message(style, &text).ok().flatten();
            let slot = &mut *responses.add(i);
            slot.resp_retcode = 0;
            slot.resp = match reply.and_then(|r| CString::new(r).ok()) {
                // PAM frees `resp` with `free(3)`, so the buffer must
                // come from `libc::malloc`, not Rust's allocator.
                Some(c) => {
                    let bytes = c.as_bytes_with_nul();
                    let buf = libc::malloc(bytes.len()) as *mut c_char;
                    if !buf.is_null() {
                        ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, bytes.len());
                    }
                    buf
                }
                None => ptr::null_mut(),
            };
        }
        *resp = responses;
        PAM_SUCCESS
    }
}

pub struct PamContext<'a> {
    handle: *mut pam_handle_t,
    last_status: c_int,
    _converser_slot: Box<*const (dyn Converser + 'a)>,
}

impl<'a> PamContext<'a> {
    pub fn start(service: &str, username: &str, converser: &'a dyn Converser) -> Result<PamContext<'a>, Error> {
        let c_service = CString::new(service)
            .map_err(|_| Error::Authentication("invalid service name".into()))?;
        let c_user = CString::new(username)
            .map_err(|_| Error::Authentication("invalid username".into()))?;

        // Boxed so the fat pointer behind it has a stable address for
        // PAM's `appdata_ptr` across the lifetime of the handle.
        let converser_slot: Box<*const (dyn Converser + 'a)> = Box::new(converser as *const dyn Converser);

        let conv = PamConv {
            conv: conversation_trampoline,
            appdata_ptr: &*converser_slot as *const *const dyn Converser as *mut c_void,
        };

        let mut handle: *mut pam_handle_t = ptr::null_mut();
        // SAFETY: all pointers passed are valid for the duration of
        // this call; `handle` is an out-parameter PAM populates.
        let rc = unsafe { pam_start(c_service.as_ptr(), c_user.as_ptr(), &conv, &mut handle) };
        if rc != PAM_SUCCESS || handle.is_null() {
            return Err(Error::Authentication(format!("pam_start failed ({rc})")));
        }

        Ok(PamContext {
            handle,
            last_status: PAM_SUCCESS,
            _converser_slot: converser_slot,
        })
    }

    pub fn authenticate(&mut self) -> Result<(), Error> {
        // SAFETY: `self.handle` is a live handle from `pam_start`.
        let rc = unsafe { pam_authenticate(self.handle, 0) };
        self.last_status = rc;
        if rc == PAM_SUCCESS {
            Ok(())
        } else {
            Err(Error::Authentication(self.strerror(rc)))
        }
    }

    pub fn validate_account(&mut self) -> Result<(), Error> {
        // SAFETY: see `authenticate`.
        let rc = unsafe { pam_acct_mgmt(self.handle, 0) };
        self.last_status = rc;
        if rc == PAM_SUCCESS {
            Ok(())
        } else {
            Err(Error::Authentication(self.strerror(rc)))
        }
    }

    fn strerror(&self, code: c_int) -> String {
        // SAFETY: `pam_strerror` returns a pointer to a static string
        // owned by the PAM library; it is never freed by us.
        unsafe {
            let ptr = pam_strerror(self.handle, code);
            if ptr.is_null() {
                format!("pam error {code}")
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }
}

impl<'a> Drop for PamContext<'a> {
    fn drop(&mut self) {
        // SAFETY: `self.handle` is valid and owned by this context.
        unsafe {
            pam_end(self.handle, self.last_status);
        }
    }
}
