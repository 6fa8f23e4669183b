//! Arbitrary bytes and handles decoded against the nested `Root` schema.
//!
//! The decoder must reject malformed input with an error, never a panic,
//! and anything it accepts must go back through the encoder.

use bolero::check;
use fathom_codec::{decode, encode};
use fathom_fuzz::{ROOT, event_handle, library};

fn main() {
    let library = library();
    check!()
        .with_type::<(Vec<u8>, u8)>()
        .for_each(|(bytes, handle_count)| {
            let handles = (0..handle_count % 4).map(|_| event_handle()).collect();
            if let Ok(value) = decode(&library, ROOT, bytes, handles) {
                let _ = encode(&library, ROOT, value);
            }
        });
}
