//! Lua wrapper placed around user scripts before they are sent to Splash.

/// Error raised inside Splash when the user script has no `main` function.
pub const MISSING_MAIN_ERROR: &str = "Script must define function main(splash, args)";

/// Wrap a user script so that its `main` receives flattened arguments.
///
/// The user's `main` is captured into a local and the global is cleared.
/// A new `main(splash, args)` copies the keys of `args.args` into the top
/// level of `args` once before delegating.
pub fn wrap_script(script: &str) -> String {
    let fail_fast = format!("    error('{}')", MISSING_MAIN_ERROR);
    let lines = [
        "--[[ user script ]]--",
        script,
        "",
        "local __scriptrelay_user_main = main",
        "main = nil",
        "if type(__scriptrelay_user_main) ~= 'function' then",
        fail_fast.as_str(),
        "end",
        "",
        "local function __scriptrelay_flatten_args(args)",
        "    local flattened = args or {}",
        "    if flattened.args then",
        "        for k, v in pairs(flattened.args) do",
        "            flattened[k] = v",
        "        end",
        "        flattened.args = nil",
        "    end",
        "    return flattened",
        "end",
        "",
        "function main(splash, args)",
        "    return __scriptrelay_user_main(splash, __scriptrelay_flatten_args(args))",
        "end",
    ];

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_script_precedes_wrapper() {
        let script = "function main(splash, args)\n  return {title = splash:evaljs('document.title')}\nend";
        let wrapped = wrap_script(script);

        let user_at = wrapped.find(script).unwrap();
        let capture_at = wrapped.find("local __scriptrelay_user_main = main").unwrap();
        assert!(user_at < capture_at);
    }

    #[test]
    fn test_wrapper_fails_fast_without_main() {
        let wrapped = wrap_script("local x = 1");
        assert!(wrapped.contains("error('Script must define function main(splash, args)')"));
        assert!(wrapped.contains("if type(__scriptrelay_user_main) ~= 'function' then"));
    }

    #[test]
    fn test_wrapper_redefines_main_once() {
        let wrapped = wrap_script("function main(splash, args) end");
        assert_eq!(wrapped.matches("\nfunction main(splash, args)\n").count(), 1);
        assert!(wrapped.ends_with("end"));
        assert!(wrapped.contains("main = nil"));
    }
}
