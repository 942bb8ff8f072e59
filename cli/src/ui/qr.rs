//! QR code rendering for sharing public keys.

use qrcode::{Color, EcLevel, QrCode};

/// Quiet zone around the code, in modules
const QUIET: usize = 2;

/// Render `data` as a QR code using half-block characters, two module
/// rows per line.
pub fn render_qr(data: &str) -> Result<String, qrcode::types::QrError> {
    // A base64 RSA-2048 key is ~400 characters; low correction keeps it scannable
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)?;
    let width = code.width();
    let size = width + 2 * QUIET;

    let dark = |x: usize, y: usize| -> bool {
        if x < QUIET || y < QUIET || x >= width + QUIET || y >= width + QUIET {
            return false;
        }
        code[(x - QUIET, y - QUIET)] == Color::Dark
    };

    let mut out = String::new();
    for y in (0..size).step_by(2) {
        for x in 0..size {
            out.push(match (dark(x, y), dark(x, y + 1)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Print a QR code to the terminal.
pub fn print_qr_code(data: &str) {
    match render_qr(data) {
        Ok(code) => print!("{}", code),
        Err(e) => eprintln!("Failed to generate QR code: {}", e),
    }
}
