//! Centralized environment-variable parsing helpers.
//!
//! Tuning knobs read from the environment go through these helpers so the
//! parsing rules live in one place. Values are read once and cached.

/// Parses the environment variable as a `u64`, returning `Some` only when
/// the value is a valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// Declares a cached `Option<usize>` knob backed by a `OnceLock`.
macro_rules! define_env_usize {
    ($fn_name:ident, $var:expr) => {
        #[inline]
        pub(crate) fn $fn_name() -> Option<usize> {
            static VALUE: ::std::sync::OnceLock<Option<usize>> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| {
                $crate::env_config::env_var_positive_u64($var)
                    .and_then(|value| usize::try_from(value).ok())
            })
        }
    };
}

define_env_usize!(max_workers_override, "HDR_PQ_PNG_MAX_WORKERS");

#[cfg(test)]
mod tests {
    use super::parse_positive_u64;

    #[test]
    fn positive_integers_only() {
        assert_eq!(parse_positive_u64(" 12 "), Some(12));
        assert_eq!(parse_positive_u64("0"), None);
        assert_eq!(parse_positive_u64("-3"), None);
        assert_eq!(parse_positive_u64("eight"), None);
    }
}
