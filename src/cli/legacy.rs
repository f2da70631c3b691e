//! Rewriting of the slash-style flags (`/r`, `/resume`, ...) accepted by
//! older invocations into their long forms.

use std::ffi::OsString;

/// Slash flag (lowercase) and the long flag it stands for.
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("/r", "--root"),
    ("/root", "--root"),
    ("/res", "--resume"),
    ("/resume", "--resume"),
    ("/st", "--state"),
    ("/state", "--state"),
    ("/skip", "--skip"),
    ("/d", "--destination-root"),
    ("/destinationroot", "--destination-root"),
];

/// Long flags whose next argument is a value.
const VALUE_FLAGS: &[&str] = &[
    "--root",
    "--state",
    "--destination-root",
    "--config",
    "--parallelism",
    "--save-every",
];

/// Rewrite legacy flags in flag position. The first element (program name)
/// and any value following a value-taking flag pass through untouched.
pub fn rewrite_legacy_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut expects_value = false;
    for (index, arg) in args.into_iter().enumerate() {
        if index == 0 || expects_value {
            expects_value = false;
            out.push(arg);
            continue;
        }
        match arg.to_str().and_then(long_form) {
            Some(long) => {
                expects_value = VALUE_FLAGS.contains(&long);
                out.push(OsString::from(long));
            }
            None => {
                expects_value = arg.to_str().is_some_and(|f| VALUE_FLAGS.contains(&f));
                out.push(arg);
            }
        }
    }
    out
}

fn long_form(arg: &str) -> Option<&'static str> {
    let lowered = arg.to_ascii_lowercase();
    LEGACY_FLAGS
        .iter()
        .find(|(legacy, _)| *legacy == lowered)
        .map(|(_, long)| *long)
}
