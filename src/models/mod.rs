// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod item;

pub use account::{Account, AccountProfile, SyncStamps};
pub use item::{ReconcilePolicy, ResourceKind, SyncedItem};
