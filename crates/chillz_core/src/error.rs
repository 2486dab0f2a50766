/*
 * SPDX-FileCopyrightText: 2026 CHILL_Z Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Failure taxonomy at the component boundary. Reads degrade to empty or
/// prior state with a logged diagnostic; writes surface a transient notice
/// after the optimistic local mutation has been reverted. Nothing here is
/// fatal to the process.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("sign-in required")]
    AuthRequired,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("remote read failed: {0:#}")]
    RemoteRead(#[source] anyhow::Error),
    #[error("remote write failed: {0:#}")]
    RemoteWrite(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn read(err: impl Into<anyhow::Error>) -> Self {
        ServiceError::RemoteRead(err.into())
    }

    pub fn write(err: impl Into<anyhow::Error>) -> Self {
        ServiceError::RemoteWrite(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
