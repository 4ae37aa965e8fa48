//! Command-line helpers shared by the binaries

use std::ffi::OsString;

/// Single-dash long flags accepted for compatibility
const LONG_FLAGS: &[&str] = &["listen"];

/// Rewrite single-dash long flags (`-listen :9000`, `-listen=:9000`) to the
/// double-dash form, so they are not parsed as `-l isten`.
///
/// Arguments after a `--` terminator are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut terminated = false;

    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if terminated {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                terminated = true;
                return arg;
            }

            let Some(flag) = text.strip_prefix('-').filter(|rest| !rest.starts_with('-')) else {
                return arg;
            };
            let name = flag.split_once('=').map_or(flag, |(name, _)| name);
            if LONG_FLAGS.contains(&name) {
                OsString::from(format!("-{}", text))
            } else {
                arg
            }
        })
        .collect()
}
