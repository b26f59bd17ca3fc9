//! Failpoint injection for crash-safety testing (spec §8: "interrupting
//! `install_golden` at any step before the final marker write").
//!
//! Mirrors the `try_fail_point!` helper the teacher crate builds on top of
//! the `fail` crate: a fail point that, when armed, short-circuits the
//! current function with an error instead of running the rest of its body.
//! In normal operation (`FailScenario` never armed via `FAILPOINTS`) these
//! are zero-cost no-ops.

#[macro_export]
macro_rules! try_fail_point {
    ($name:expr) => {
        fail::fail_point!($name, |_| {
            anyhow::bail!("failpoint '{}' triggered", $name)
        });
    };
}
