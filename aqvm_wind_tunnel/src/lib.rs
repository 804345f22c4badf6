// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for the AQ bytecode VM live in `benches/`.
