mod preamble;
mod relay;

pub use preamble::{
    read_preamble, render_upstream_preamble, BodyKind, HeaderList, Preamble, CHUNK_SIZE,
    MAX_HEADER_COUNT, MAX_HEADER_LINE_BYTES, MAX_PREAMBLE_BYTES,
};
pub use relay::{relay_request_body, relay_response, RelayedResponse};
