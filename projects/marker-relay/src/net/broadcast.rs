// Result broadcaster: one bounded ASCII datagram per frame, fire-and-forget.
//
// Wire format, parsed by the triangulation server in groups of four fields:
//
//   <cameraId> { " " <markerId> " " <x> " " <size> " " <confidence> }*

use crate::pipeline::types::{MarkerPosition, MAX_TRACKED_MARKERS};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::net::{SocketAddr, UdpSocket};

/// Hard bound on one datagram; messages degrade by dropping whole marker
/// groups rather than overflowing or splitting a group.
pub const MAX_DATAGRAM_LEN: usize = 256;

/// Serializes staged marker records into position datagrams for one fixed
/// destination.
///
/// Transmission is best-effort: failures are logged and dropped, never
/// retried, and never surface to the detection path.
pub struct Broadcaster {
    socket: UdpSocket,
    dest: SocketAddr,
    camera_id: u32,
    staged: Vec<MarkerPosition>,
}

impl Broadcaster {
    pub fn new(camera_id: u32, dest: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .with_context(|| format!("binding broadcast socket for {dest}"))?;
        Ok(Self {
            socket,
            dest,
            camera_id,
            staged: Vec::with_capacity(MAX_TRACKED_MARKERS),
        })
    }

    /// Stages one record for the next `send`. Staging beyond the protocol's
    /// four-group cap is a caller error: logged and ignored.
    pub fn stage(&mut self, marker: &MarkerPosition) {
        if self.staged.len() >= MAX_TRACKED_MARKERS {
            tracing::warn!(
                "cannot stage more than {MAX_TRACKED_MARKERS} markers per datagram, dropping marker {}",
                marker.id
            );
            return;
        }
        self.staged.push(*marker);
    }

    /// Clears the staging buffer; the next `send` carries only the camera id.
    pub fn reset(&mut self) {
        self.staged.clear();
    }

    /// Builds and transmits one datagram from the staged records, in staging
    /// order. Transport errors are absorbed here.
    pub fn send(&self) {
        let message = self.render();
        if let Err(err) = self.socket.send_to(message.as_bytes(), self.dest) {
            tracing::warn!("position broadcast to {} failed: {err}", self.dest);
        }
    }

    fn render(&self) -> String {
        let mut message = self.camera_id.to_string();
        for marker in &self.staged {
            let mut group = String::new();
            // shortest round-trip float form; the consumer parses with float()
            let _ = write!(
                group,
                " {} {:?} {:?} {:?}",
                marker.id, marker.x, marker.size, marker.confidence
            );
            if message.len() + group.len() > MAX_DATAGRAM_LEN {
                tracing::warn!(
                    "datagram full at {} bytes, dropping marker {} and the rest",
                    message.len(),
                    marker.id
                );
                break;
            }
            message.push_str(&group);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn marker(id: u8, x: f32, size: f32, confidence: f32) -> MarkerPosition {
        MarkerPosition {
            id,
            x,
            size,
            min_row: 0,
            max_row: 0,
            confidence,
            found: true,
        }
    }

    fn local_broadcaster(camera_id: u32) -> (Broadcaster, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();
        (Broadcaster::new(camera_id, dest).unwrap(), receiver)
    }

    #[test]
    fn renders_groups_in_staging_order() {
        let (mut bc, _rx) = local_broadcaster(7);
        bc.stage(&marker(3, 120.5, 30.0, 0.9));
        bc.stage(&marker(1, 400.0, 22.5, 0.75));
        assert_eq!(bc.render(), "7 3 120.5 30.0 0.9 1 400.0 22.5 0.75");
    }

    #[test]
    fn reset_empties_the_staging_buffer() {
        let (mut bc, _rx) = local_broadcaster(2);
        bc.stage(&marker(1, 10.0, 5.0, 0.5));
        bc.reset();
        assert_eq!(bc.render(), "2");
    }

    #[test]
    fn four_groups_fit_a_fifth_is_rejected() {
        let (mut bc, _rx) = local_broadcaster(0);
        for id in 1..=4 {
            bc.stage(&marker(id, 100.0, 20.0, 0.5));
        }
        bc.stage(&marker(1, 999.0, 99.0, 0.99));

        let message = bc.render();
        assert_eq!(message.split(' ').count(), 1 + 4 * 4);
        assert!(!message.contains("999"));
    }

    #[test]
    fn datagram_never_exceeds_the_bound() {
        let (mut bc, _rx) = local_broadcaster(u32::MAX);
        for id in 1..=4 {
            // worst-case float renderings
            bc.stage(&marker(id, 1234.5678, 987.654_3, 0.123_456_79));
        }
        let message = bc.render();
        assert!(message.len() <= MAX_DATAGRAM_LEN);
        // truncation, when it happens, drops whole groups
        assert_eq!((message.split(' ').count() - 1) % 4, 0);
    }

    #[test]
    fn sends_over_loopback() {
        let (mut bc, rx) = local_broadcaster(5);
        bc.stage(&marker(2, 55.5, 12.0, 0.25));
        bc.send();

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"5 2 55.5 12.0 0.25");
    }

    #[test]
    fn send_with_nothing_staged_carries_only_the_camera_id() {
        let (bc, rx) = local_broadcaster(9);
        bc.send();
        let mut buf = [0u8; 16];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"9");
    }
}
