use backtrace::{Backtrace, BacktraceSymbol};
use serde::Serialize;
use std::path::Path;

use crate::entry::ErrorValue;

/// A stack trace in the shape the Sentry server renders, oldest call first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

/// One frame of a [`Stacktrace`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction_addr: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pre_context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_line: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_context: Vec<String>,
    pub in_app: bool,
}

impl Frame {
    /// Build a frame from a resolved symbol.
    ///
    /// Returns `None` for symbols that carry neither a name nor a file, and
    /// for frames that belong to the capture machinery itself.
    pub fn from_symbol(
        addr: Option<usize>,
        symbol: &BacktraceSymbol,
        context: i32,
        in_app_prefixes: &[String],
    ) -> Option<Frame> {
        let name = symbol.name().map(|n| format!("{n:#}"));
        let file = symbol.filename();
        if name.is_none() && file.is_none() {
            return None;
        }

        let (module, function) = match name.as_deref() {
            Some(name) => split_function_name(name),
            None => (None, None),
        };
        if module.as_deref().is_some_and(|m| m == "backtrace" || m.starts_with("backtrace::")) {
            return None;
        }

        let mut frame = Frame {
            filename: file.map(trim_path),
            function,
            module,
            lineno: symbol.lineno(),
            colno: symbol.colno(),
            abs_path: file.map(|p| p.display().to_string()),
            instruction_addr: addr.map(|a| format!("{a:#x}")),
            ..Default::default()
        };
        frame.in_app = is_in_app(frame.module.as_deref(), in_app_prefixes);

        if let (Some(path), Some(line)) = (file, frame.lineno) {
            frame.load_context(path, line as usize, context);
        }
        Some(frame)
    }

    fn load_context(&mut self, path: &Path, line: usize, context: i32) {
        if context == 0 || line == 0 {
            return;
        }
        let Ok(source) = std::fs::read_to_string(path) else {
            return;
        };
        let lines: Vec<&str> = source.lines().collect();
        let idx = line - 1;
        if idx >= lines.len() {
            return;
        }

        self.context_line = Some(lines[idx].to_string());
        if context > 0 {
            let span = context as usize;
            let start = idx.saturating_sub(span);
            let end = (idx + span + 1).min(lines.len());
            self.pre_context = lines[start..idx].iter().map(|l| l.to_string()).collect();
            self.post_context = lines[idx + 1..end].iter().map(|l| l.to_string()).collect();
        }
    }
}

impl Stacktrace {
    /// Capture the stack of the calling thread.
    ///
    /// `skip` drops that many of the innermost frames. Returns `None` when no
    /// frame could be resolved.
    pub fn capture(skip: usize, context: i32, in_app_prefixes: &[String]) -> Option<Stacktrace> {
        let backtrace = Backtrace::new();
        let mut frames: Vec<Frame> = frames_of(&backtrace, context, in_app_prefixes)
            .skip(skip)
            .collect();
        if frames.is_empty() {
            return None;
        }
        frames.reverse();
        Some(Stacktrace { frames })
    }

    /// Symbolicate a raw backtrace. Frames that do not resolve are dropped.
    pub fn from_backtrace(backtrace: &Backtrace, context: i32, in_app_prefixes: &[String]) -> Stacktrace {
        let mut backtrace = backtrace.clone();
        backtrace.resolve();

        // Backtrace lists the innermost call first.
        let mut frames: Vec<Frame> = frames_of(&backtrace, context, in_app_prefixes).collect();
        frames.reverse();
        Stacktrace { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `module::function` of the most recent in-app frame, or an empty
    /// string if there is none.
    pub fn culprit(&self) -> String {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| match (&frame.module, &frame.function) {
                (Some(module), Some(function))
                    if frame.in_app && !module.is_empty() && !function.is_empty() =>
                {
                    Some(format!("{module}::{function}"))
                }
                _ => None,
            })
            .unwrap_or_default()
    }
}

fn frames_of<'a>(
    backtrace: &'a Backtrace,
    context: i32,
    in_app_prefixes: &'a [String],
) -> impl Iterator<Item = Frame> + 'a {
    backtrace.frames().iter().flat_map(move |frame| {
        let addr = frame.ip() as usize;
        frame
            .symbols()
            .iter()
            .filter_map(move |symbol| Frame::from_symbol(Some(addr), symbol, context, in_app_prefixes))
    })
}

/// Find the stack trace to report for `err`.
///
/// Walks the chain from the outermost link inwards. A link carrying a
/// ready-made trace ends the walk and its trace is used as-is. Otherwise the
/// innermost raw backtrace wins; it is symbolicated only after the walk.
pub fn find_stacktrace(err: &ErrorValue, context: i32, in_app_prefixes: &[String]) -> Option<Stacktrace> {
    let mut raw: Option<&Backtrace> = None;

    let mut link = Some(err);
    while let Some(current) = link {
        if let Some(stacktrace) = current.stacktrace() {
            return Some(stacktrace.clone());
        }
        if let Some(backtrace) = current.backtrace() {
            raw = Some(backtrace);
        }
        link = current.cause();
    }

    raw.map(|backtrace| Stacktrace::from_backtrace(backtrace, context, in_app_prefixes))
}

fn split_function_name(name: &str) -> (Option<String>, Option<String>) {
    match name.rsplit_once("::") {
        Some((module, function)) => (Some(module.to_string()), Some(function.to_string())),
        None => (None, Some(name.to_string())),
    }
}

fn is_in_app(module: Option<&str>, prefixes: &[String]) -> bool {
    let Some(module) = module else {
        return false;
    };
    prefixes.iter().any(|prefix| {
        module.starts_with(prefix.as_str())
            && !module.contains("vendor")
            && !module.contains("third_party")
    })
}

/// Path relative to the enclosing `src/` directory, when there is one.
fn trim_path(path: &Path) -> String {
    let full = path.display().to_string();
    match full.rfind("/src/") {
        Some(idx) => full[idx + 1..].to_string(),
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtrace::BacktraceFrame;

    fn frame(module: &str, function: &str, in_app: bool) -> Frame {
        Frame {
            module: Some(module.to_string()),
            function: Some(function.to_string()),
            in_app,
            ..Default::default()
        }
    }

    fn function_names(stacktrace: &Stacktrace) -> Vec<String> {
        stacktrace
            .frames
            .iter()
            .map(|f| format!("{}::{}", f.module.clone().unwrap_or_default(), f.function.clone().unwrap_or_default()))
            .collect()
    }

    /// Frames of the current stack that resolve to exactly one named symbol
    /// outside the backtrace crate, innermost first.
    fn clean_frames(take: usize) -> (Backtrace, Vec<String>) {
        let captured = Backtrace::new();
        let frames: Vec<BacktraceFrame> = captured
            .frames()
            .iter()
            .filter(|f| {
                f.symbols().len() == 1
                    && f.symbols()[0]
                        .name()
                        .map(|n| format!("{n:#}"))
                        .is_some_and(|n| n.contains("::") && !n.starts_with("backtrace::"))
            })
            .take(take)
            .cloned()
            .collect();
        let names = frames
            .iter()
            .map(|f| format!("{:#}", f.symbols()[0].name().expect("name")))
            .collect();
        (Backtrace::from(frames), names)
    }

    #[test]
    fn culprit_picks_the_newest_in_app_frame() {
        let stacktrace = Stacktrace {
            frames: vec![
                frame("app::main", "run", true),
                frame("app::handlers", "login", true),
                frame("tokio::runtime", "poll", false),
            ],
        };
        assert_eq!(stacktrace.culprit(), "app::handlers::login");
    }

    #[test]
    fn culprit_is_empty_without_in_app_frames() {
        let stacktrace = Stacktrace {
            frames: vec![frame("std::rt", "lang_start", false)],
        };
        assert_eq!(stacktrace.culprit(), "");
    }

    #[test]
    fn in_app_requires_prefix_and_excludes_vendored_code() {
        let prefixes = vec!["app".to_string()];
        assert!(is_in_app(Some("app::db"), &prefixes));
        assert!(!is_in_app(Some("app::vendor::db"), &prefixes));
        assert!(!is_in_app(Some("std::io"), &prefixes));
        assert!(!is_in_app(None, &prefixes));
    }

    #[test]
    fn trim_path_keeps_the_src_relative_part() {
        assert_eq!(trim_path(Path::new("/home/me/app/src/db/mod.rs")), "src/db/mod.rs");
        assert_eq!(trim_path(Path::new("build.rs")), "build.rs");
    }

    #[test]
    fn converted_backtrace_is_oldest_first() {
        let (backtrace, innermost_first) = clean_frames(3);
        assert!(!innermost_first.is_empty());

        let stacktrace = Stacktrace::from_backtrace(&backtrace, 0, &[]);
        let mut expected = innermost_first;
        expected.reverse();
        assert_eq!(function_names(&stacktrace), expected);
        assert!(stacktrace.frames.iter().all(|f| f.instruction_addr.is_some()));
    }

    #[test]
    fn raw_backtrace_on_innermost_link_is_used() {
        let (backtrace, innermost_first) = clean_frames(4);
        let err = ErrorValue::new("Outer", "outer")
            .with_cause(ErrorValue::new("Middle", "middle").with_cause(
                ErrorValue::new("Inner", "inner").with_backtrace(backtrace),
            ));

        let stacktrace = find_stacktrace(&err, 0, &[]).expect("stacktrace");
        assert_eq!(stacktrace.frames.len(), innermost_first.len());
        assert_eq!(function_names(&stacktrace).last(), innermost_first.first());
    }

    #[test]
    fn ready_made_trace_wins_when_the_chain_ends_there() {
        let ready = Stacktrace {
            frames: vec![frame("app", "handler", true)],
        };
        let err = ErrorValue::new("Outer", "outer").with_stacktrace(ready.clone());
        assert_eq!(find_stacktrace(&err, 0, &[]), Some(ready));
    }

    #[test]
    fn inner_ready_made_trace_clears_outer_raw_backtrace() {
        let (backtrace, _) = clean_frames(2);
        let ready = Stacktrace {
            frames: vec![frame("app", "handler", true)],
        };
        let err = ErrorValue::new("Outer", "outer")
            .with_backtrace(backtrace)
            .with_cause(ErrorValue::new("Inner", "inner").with_stacktrace(ready.clone()));
        assert_eq!(find_stacktrace(&err, 0, &[]), Some(ready));
    }

    #[test]
    fn ready_made_trace_ends_the_walk_before_inner_raw_backtrace() {
        let (backtrace, _) = clean_frames(3);
        let ready = Stacktrace {
            frames: vec![frame("app", "handler", true)],
        };
        let err = ErrorValue::new("Outer", "outer")
            .with_stacktrace(ready.clone())
            .with_cause(
                ErrorValue::new("Middle", "middle")
                    .with_cause(ErrorValue::new("Inner", "inner").with_backtrace(backtrace)),
            );
        assert_eq!(find_stacktrace(&err, 0, &[]), Some(ready));
    }

    #[test]
    fn traced_error_wrapping_a_backtraced_chain_keeps_its_own_trace() {
        use crate::error::{Backtraced, Traced};

        #[derive(Debug)]
        struct Query(Backtraced);

        impl std::fmt::Display for Query {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("query failed")
            }
        }

        impl std::error::Error for Query {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let ready = Stacktrace {
            frames: vec![frame("app", "handler", true)],
        };
        let err = Traced::new(Query(Backtraced::new("connection reset")), ready.clone());
        let value = ErrorValue::capture(&err);
        assert!(value.cause().and_then(ErrorValue::backtrace).is_some());
        assert_eq!(find_stacktrace(&value, 0, &[]), Some(ready));
    }

    #[test]
    fn no_trace_anywhere_yields_none() {
        let err = ErrorValue::new("Outer", "outer").with_cause(ErrorValue::new("Inner", "inner"));
        assert_eq!(find_stacktrace(&err, 0, &[]), None);
    }

    #[test]
    fn capture_marks_in_app_frames() {
        let prefixes = vec!["sentry_log_hook".to_string()];
        let stacktrace = Stacktrace::capture(0, 0, &prefixes).expect("stacktrace");
        assert!(stacktrace.frames.iter().any(|f| f.in_app));
        assert!(stacktrace.culprit().starts_with("sentry_log_hook::"));
    }

    #[test]
    fn context_lines_are_read_from_source() {
        let stacktrace = Stacktrace::capture(0, 2, &["sentry_log_hook".to_string()]).expect("stacktrace");
        let frame = stacktrace
            .frames
            .iter()
            .rev()
            .find(|f| f.in_app && f.context_line.is_some())
            .expect("in-app frame with context");
        assert!(frame.pre_context.len() <= 2);
        assert!(frame.post_context.len() <= 2);
    }
}
