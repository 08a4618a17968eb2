//! Integration test: data-channel frames through the public codec API.

use bytes::Bytes;
use cohost_protocol::wire::{
    decode_client_frame, decode_server_frame, encode_client_frame, encode_server_frame,
};
use cohost_protocol::{ClientFrame, ServerFrame};
use cohost_types::InputIntent;

#[test]
fn move_frame_from_the_wire() {
    let bytes = [1u8, 0, 4, 0, 10, 0, 20];
    assert_eq!(
        decode_client_frame(&bytes).unwrap(),
        ClientFrame::Input(InputIntent::Move { x: 10, y: 20 })
    );

    let err = decode_client_frame(&bytes[..5]).unwrap_err();
    assert!(err.is_decode());
}

#[test]
fn every_prefix_of_every_frame_is_rejected_without_panicking() {
    let frames = [
        ClientFrame::Input(InputIntent::Move { x: -5, y: 300 }),
        ClientFrame::Input(InputIntent::Scroll { dx: 0, dy: -120 }),
        ClientFrame::Input(InputIntent::KeyDown(0xff0d)),
        ClientFrame::Input(InputIntent::ButtonUp(3)),
        ClientFrame::Ping { client_ts: 1_700_000_000_000 },
    ];
    for frame in &frames {
        let bytes = encode_client_frame(frame);
        assert_eq!(&decode_client_frame(&bytes).unwrap(), frame);
        for cut in 0..bytes.len() {
            assert!(decode_client_frame(&bytes[..cut]).is_err(), "{frame:?} cut at {cut}");
        }
    }
}

#[test]
fn cursor_image_carries_png_after_hotspot() {
    let png = Bytes::from_static(&[0x89, b'P', b'N', b'G']);
    let frame = ServerFrame::CursorImage {
        width: 16,
        height: 24,
        x_hot: 1,
        y_hot: 2,
        png: png.clone(),
    };
    let bytes = encode_server_frame(&frame).unwrap();
    assert_eq!(bytes[0], 0x81);
    assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), 12);
    assert_eq!(&bytes[11..], &png[..]);
    assert_eq!(decode_server_frame(&bytes).unwrap(), Some(frame));
}
