use nu_ansi_term::Color::{Cyan, LightBlue, Red, Yellow};

/// Print info on console.
pub fn info(message: &str) {
    println!("{}", Cyan.bold().paint(message));
}

/// Print info with a highlighted data value on console.
pub fn info_with_data(message: &str, data: &str) {
    println!(
        "{} {}",
        Cyan.bold().paint(message),
        LightBlue.bold().paint(data)
    );
}

/// Print warning on console.
pub fn warn(message: &str, data: &str) {
    println!(
        "{} {}",
        Yellow.bold().paint(message),
        LightBlue.bold().paint(data)
    );
}

/// Print error on console.
pub fn error(message: &str, data: &str) {
    eprintln!(
        "{} {}",
        Red.bold().paint(message),
        LightBlue.bold().paint(data)
    );
}
