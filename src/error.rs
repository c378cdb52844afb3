//
// imbatch - error.rs - typed error hierarchy
//
// Copyright (c) 2018 Brion Vibber
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.
//

use std::path::PathBuf;

/// Longest message a per-item error may carry; mirrors the fixed 512-byte
/// message buffer of the source this crate is modeled on.
pub const MAX_ERROR_MESSAGE: usize = 512;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Rejected before any worker is touched.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Decode/probe failure for one file. Recorded on the item, never fails the batch.
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Async host->device copy failure. Recorded on the item that triggered it.
    #[error("device transfer failed: {0}")]
    Device(String),

    /// Worker pool creation or other fatal setup failure.
    #[error("execution failure: {0}")]
    Execution(String),
}

impl Error {
    pub fn read(path: impl Into<PathBuf>, message: impl AsRef<str>) -> Error {
        Error::Read {
            path: path.into(),
            message: truncate(message.as_ref()),
        }
    }

    pub fn device(message: impl AsRef<str>) -> Error {
        Error::Device(truncate(message.as_ref()))
    }

    pub fn config(message: impl Into<String>) -> Error {
        Error::Config(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Error {
        Error::Execution(message.into())
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE {
        message.to_string()
    } else {
        let mut end = MAX_ERROR_MESSAGE;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message[..end].to_string()
    }
}
