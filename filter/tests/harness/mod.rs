// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Simulated client populations, their inputs and the outcome tally.

pub mod attacks;
pub mod generators;
pub mod metrics;
