// Integration-test harness for kiln-cook.
//
// Cargo builds one test binary per `tests/*.rs` file; everything lives under `suite/` so the
// crate links a single test binary.

mod suite;
