// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Utility module for common utilities used throughout the project

pub mod fixed_point;

// Re-exports for use in other modules
pub use fixed_point::{from_fixed_point, join_dword, split_dword, to_fixed_point};
