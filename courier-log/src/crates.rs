// Defines CRATE_NAMES, the library names of all workspace crates.
include!(concat!(env!("OUT_DIR"), "/crate_names.gen.rs"));

/// Builds filter directives with `fallback` for foreign targets and a level per workspace crate.
pub(crate) fn directives<'a>(fallback: &str, level_of: impl Fn(&str) -> &'a str) -> String {
    let mut directives = fallback.to_owned();
    for name in CRATE_NAMES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(level_of(name));
    }
    directives
}
