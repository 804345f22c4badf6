// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end conformance tests for the AQ bytecode VM live in `tests/`.
