//! Pairing code rendering.
//!
//! Turns the opaque pairing payload handed out by the device protocol into a
//! terminal glyph block, an SVG data URL and the raw string.

use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::{svg, unicode};
use thiserror::Error;
use wagate_protocol::PairingPayload;

/// Minimum edge length of the rendered SVG, in pixels.
const IMAGE_MIN_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("pairing payload is empty")]
    Empty,

    #[error("failed to encode pairing code: {0}")]
    Encode(#[from] qrcode::types::QrError),
}

/// Render `raw` in every form a front end may want.
pub fn render_pairing(raw: &str) -> Result<PairingPayload, PairingError> {
    if raw.is_empty() {
        return Err(PairingError::Empty);
    }
    let code = QrCode::new(raw.as_bytes())?;

    // Inverted colours: terminals are usually dark, scanners want dark-on-light.
    let terminal_form = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build();

    let svg_image = code
        .render::<svg::Color>()
        .min_dimensions(IMAGE_MIN_SIZE, IMAGE_MIN_SIZE)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    let image_data_url = format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg_image));

    Ok(PairingPayload {
        terminal_form,
        image_data_url,
        raw_payload: raw.to_string(),
    })
}

/// Print the terminal form with scanning instructions.
pub fn print_to_terminal(payload: &PairingPayload, mut out: impl Write) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "Scan this code with the phone app (Linked devices → Link a device):"
    )?;
    writeln!(out, "{}", payload.terminal_form)?;
    out.flush()
}
