use std::panic::PanicHookInfo;

use console::style;

fn payload(info: &PanicHookInfo<'_>) -> String {
    info.payload()
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| info.to_string())
}

/// Logs panics through tracing, so a crashing server leaves a record next to
/// its other logs, and asks the user to report them.
pub fn set() {
    std::panic::set_hook(Box::new(|info| {
        let msg = payload(info);
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        tracing::error!(%location, "panic: {msg}");
        eprintln!(
            "{} inflow {} panicked at {location}: {msg}",
            style("bug:").red().bold(),
            env!("CARGO_PKG_VERSION")
        );
        eprintln!("Please report it along with the command you ran.");
    }));
}
