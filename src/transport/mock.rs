// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A scripted [`HeciTransport`] that replays fixed bytes, for tests that need
//! no live ME firmware.

use super::HeciTransport;
use crate::error::TransportError;
use std::collections::VecDeque;

/// One exchange the mock expects: the bytes the caller must `send`, and the
/// bytes `receive` then returns. A mismatched `send` is a test bug, not a
/// [`TransportError`] — it panics immediately so the failing assertion points
/// at the call site.
pub struct Exchange {
    pub expect_send: Vec<u8>,
    pub respond: Vec<u8>,
}

/// Replays a fixed script of request/response byte pairs in order.
pub struct MockTransport {
    mtu: usize,
    script: VecDeque<Exchange>,
    closed: bool,
}

impl MockTransport {
    pub fn new(mtu: usize, script: Vec<Exchange>) -> Self {
        MockTransport {
            mtu,
            script: script.into(),
            closed: false,
        }
    }

    /// True once every scripted exchange has been consumed.
    pub fn is_drained(&self) -> bool {
        self.script.is_empty()
    }
}

impl HeciTransport for MockTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let exchange = self
            .script
            .front()
            .unwrap_or_else(|| panic!("MockTransport: unexpected send, script exhausted"));
        assert_eq!(
            exchange.expect_send, message,
            "MockTransport: send did not match script"
        );
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let exchange = self
            .script
            .pop_front()
            .unwrap_or_else(|| panic!("MockTransport: unexpected receive, script exhausted"));
        if exchange.respond.is_empty() {
            return Err(TransportError::Empty);
        }
        Ok(exchange.respond)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    /// Mocks never actually drop their connection; this just clears the
    /// closed flag so a poisoned-handle test can still exercise the call path.
    fn reopen(&mut self) -> Result<(), TransportError> {
        self.closed = false;
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_scripted_exchange() {
        let mut t = MockTransport::new(
            4096,
            vec![Exchange {
                expect_send: vec![1, 2, 3],
                respond: vec![4, 5, 6],
            }],
        );
        t.send(&[1, 2, 3]).unwrap();
        assert_eq!(t.receive().unwrap(), vec![4, 5, 6]);
        assert!(t.is_drained());
    }

    #[test]
    #[should_panic(expected = "did not match script")]
    fn panics_on_send_mismatch() {
        let mut t = MockTransport::new(
            4096,
            vec![Exchange {
                expect_send: vec![1],
                respond: vec![2],
            }],
        );
        let _ = t.send(&[9]);
    }

    #[test]
    fn empty_response_is_transport_error() {
        let mut t = MockTransport::new(
            4096,
            vec![Exchange {
                expect_send: vec![1],
                respond: vec![],
            }],
        );
        t.send(&[1]).unwrap();
        assert!(matches!(t.receive(), Err(TransportError::Empty)));
    }
}
