use std::process;

// mio readiness semantics and signal-hook handlers are only exercised on POSIX.
pub fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: msgmux is intended for POSIX systems");
        process::exit(2);
    }
}
