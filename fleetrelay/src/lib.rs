// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod config;
pub mod identity;
pub mod message;
pub mod proxy;
pub mod store;
pub mod stream;
