pub fn print_startup_banner() {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;108m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const BANNER: &str = r#"
  _ __ ___  ___  __ _ _ __ ___  _   ___  __
 | '_ ` _ \/ __|/ _` | '_ ` _ \| | | \ \/ /
 | | | | | \__ \ (_| | | | | | | |_| |>  <
 |_| |_| |_|___/\__, |_| |_| |_|\__,_/_/\_\
                |___/                      "#;
    const APP_DESCRIPTION: &str =
        "Queue-oriented messaging middleware: one reactor thread, a worker pool and a pluggable store.";
    const LIABILITY_NOTICE: &str =
        "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("MSGMUX_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
}
