/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::ffi::{c_char, CString};

pub mod comment_thread;
pub mod composer;
pub mod data_service;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod memory;
pub mod net;
pub mod notifications;
pub mod profile;
pub mod realtime;
pub mod records;
pub mod rest;
pub mod session;
pub mod story_groups;
pub mod ui_events;
pub mod viewer;

#[no_mangle]
pub extern "C" fn chillz_core_version() -> *mut c_char {
    CString::new(env!("CARGO_PKG_VERSION"))
        .expect("version is valid CString")
        .into_raw()
}

#[no_mangle]
pub extern "C" fn chillz_core_string_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr));
    }
}
