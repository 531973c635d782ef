//! End-to-end tests of the TCP frame server against a pipeline with a
//! virtual view attached.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dmdcast_core::{Dmd, DmdConfig, FrameSnapshot, VirtualView};
use dmdcast_proto::{Mode, PathsHeader, StreamHeader, Update};
use dmdcast_server::{DmdServer, ServerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start_server() -> (Arc<Dmd>, Arc<VirtualView>, SocketAddr, ServerHandle) {
    let dmd = Arc::new(Dmd::new(DmdConfig::default()));
    let view = dmd.create_view();
    let server = DmdServer::bind("127.0.0.1", 0, Arc::clone(&dmd), false, false)
        .await
        .expect("bind to an ephemeral port");
    let addr = server.local_addr().expect("bound address");
    let handle = server.handle();
    tokio::spawn(server.run());
    (dmd, view, addr, handle)
}

/// Poll the view until a snapshot matches, with a generous timeout.
async fn wait_snapshot(
    view: &VirtualView,
    mut predicate: impl FnMut(&FrameSnapshot) -> bool,
) -> bool {
    for _ in 0..1000 {
        if let Some(snapshot) = view.take() {
            if predicate(&snapshot) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn rgb24_message(rgb: [u8; 3], buffered: bool, disconnect_others: bool) -> Vec<u8> {
    let (width, height) = (128u16, 32u16);
    let pixels = usize::from(width) * usize::from(height);
    let header = StreamHeader {
        mode: Mode::Rgb24,
        width,
        height,
        length: (pixels * 3) as u32,
        buffered,
        disconnect_others,
    };
    let mut message = header.encode().to_vec();
    for _ in 0..pixels {
        message.extend_from_slice(&rgb);
    }
    message
}

fn rgb16_message(color: u16) -> Vec<u8> {
    let (width, height) = (128u16, 32u16);
    let pixels = usize::from(width) * usize::from(height);
    let header = StreamHeader {
        mode: Mode::Rgb16,
        width,
        height,
        length: (pixels * 2) as u32,
        buffered: false,
        disconnect_others: false,
    };
    let mut message = header.encode().to_vec();
    for _ in 0..pixels {
        message.extend_from_slice(&color.to_be_bytes());
    }
    message
}

fn data_message(update: &Update, rom: &str, buffered: bool) -> Vec<u8> {
    let header = StreamHeader {
        mode: Mode::Data,
        width: update.width,
        height: update.height,
        length: 0,
        buffered,
        disconnect_others: false,
    };
    let paths = PathsHeader {
        rom_name: rom.to_string(),
        alt_color_path: String::new(),
        pup_videos_path: String::new(),
    };
    let mut message = header.encode().to_vec();
    message.extend_from_slice(&paths.encode());
    message.extend_from_slice(&update.encode()[..]);
    message
}

#[tokio::test]
async fn owner_frames_reach_the_pipeline() {
    let (_dmd, view, addr, handle) = start_server().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&rgb24_message([200, 10, 30], false, false))
        .await
        .unwrap();

    assert!(wait_snapshot(&view, |s| s.rgb24[..3] == [200, 10, 30]).await);
    handle.shutdown();
}

#[tokio::test]
async fn rgb16_payload_is_byte_swapped() {
    let (_dmd, view, addr, handle) = start_server().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    // 0xF800 is pure red; expanded to RGB24 it reads 255, 0, 0.
    client.write_all(&rgb16_message(0xF800)).await.unwrap();

    assert!(wait_snapshot(&view, |s| s.rgb24[..3] == [255, 0, 0]).await);
    handle.shutdown();
}

#[tokio::test]
async fn data_mode_indexed_update_is_forwarded() {
    let (dmd, view, addr, handle) = start_server().await;

    let update = Update {
        mode: Mode::Data,
        layout: 0,
        depth: 2,
        width: 128,
        height: 32,
        r: 255,
        g: 0,
        b: 0,
        data: Some(vec![3u8; 128 * 32]),
        seg_data: [0; 128],
        seg_data2: None,
    };
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&data_message(&update, "afm_113b", false))
        .await
        .unwrap();

    // Index 3 through the WPC ramp is full scale; the tint comes back
    // exactly.
    assert!(
        wait_snapshot(&view, |s| {
            s.levels.iter().all(|&l| l == 0x64) && s.rgb24[..3] == [255, 0, 0]
        })
        .await
    );
    // The paths header's ROM name reached the pipeline.
    assert_eq!(dmd.rom_name(), "afm_113b");
    handle.shutdown();
}

#[tokio::test]
async fn later_client_takes_over_ownership() {
    let (_dmd, view, addr, handle) = start_server().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first
        .write_all(&rgb24_message([200, 0, 0], false, false))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[0] == 200).await);

    let mut second = TcpStream::connect(addr).await.unwrap();
    second
        .write_all(&rgb24_message([0, 200, 0], false, false))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[1] == 200).await);

    // The earlier client no longer drives the display.
    first
        .write_all(&rgb24_message([0, 0, 200], false, false))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    if let Some(snapshot) = view.take() {
        assert_ne!(snapshot.rgb24[2], 200, "blocked client updated the DMD");
    }
    handle.shutdown();
}

#[tokio::test]
async fn disconnect_others_terminates_earlier_clients() {
    let (_dmd, view, addr, handle) = start_server().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first
        .write_all(&rgb24_message([200, 0, 0], false, false))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[0] == 200).await);

    let mut second = TcpStream::connect(addr).await.unwrap();
    second
        .write_all(&rgb24_message([0, 200, 0], false, true))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[1] == 200).await);

    // The server closes the earlier client within one poll interval.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), first.read(&mut buf))
        .await
        .expect("earlier client is closed")
        .expect("clean close");
    assert_eq!(read, 0);

    // The acceptor keeps running: a fresh client connects and takes over.
    let mut third = TcpStream::connect(addr).await.unwrap();
    third
        .write_all(&rgb24_message([0, 0, 200], false, false))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[2] == 200).await);
    handle.shutdown();
}

#[tokio::test]
async fn owner_disconnect_clears_the_display() {
    let (_dmd, view, addr, handle) = start_server().await;

    let client = {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&rgb24_message([200, 0, 0], false, false))
            .await
            .unwrap();
        client
    };
    assert!(wait_snapshot(&view, |s| s.rgb24[0] == 200).await);

    drop(client);
    assert!(wait_snapshot(&view, |s| s.rgb24.iter().all(|&b| b == 0)).await);
    handle.shutdown();
}

#[tokio::test]
async fn buffered_frame_suppresses_the_clear() {
    let (_dmd, view, addr, handle) = start_server().await;

    let client = {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&rgb24_message([200, 0, 0], true, false))
            .await
            .unwrap();
        client
    };
    assert!(wait_snapshot(&view, |s| s.rgb24[0] == 200).await);

    drop(client);
    // Nothing is emitted on disconnect; the display keeps the last frame.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Some(snapshot) = view.take() {
        assert!(
            snapshot.rgb24.iter().any(|&b| b != 0),
            "display was cleared despite a buffered frame"
        );
    }
    handle.shutdown();
}

#[tokio::test]
async fn oversized_frame_is_dropped_connection_survives() {
    let (_dmd, view, addr, handle) = start_server().await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    // 257 columns exceed the limit; the announced payload still gets
    // drained so the stream stays in sync.
    let pixels = 257usize * 32;
    let header = StreamHeader {
        mode: Mode::Rgb24,
        width: 257,
        height: 32,
        length: (pixels * 3) as u32,
        buffered: false,
        disconnect_others: false,
    };
    let mut message = header.encode().to_vec();
    message.extend_from_slice(&vec![0xFFu8; pixels * 3]);
    client.write_all(&message).await.unwrap();

    client
        .write_all(&rgb24_message([200, 0, 0], false, false))
        .await
        .unwrap();
    assert!(wait_snapshot(&view, |s| s.rgb24[0] == 200).await);
    handle.shutdown();
}

#[tokio::test]
async fn owner_protocol_violation_disconnects() {
    let (_dmd, _view, addr, handle) = start_server().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[0xDEu8; 22]).await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("violating owner is disconnected")
        .expect("clean close");
    assert_eq!(read, 0);
    handle.shutdown();
}
