use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use actorfabric_server::{ClientConnection, ClientPush};
use serde_json::Value;

#[derive(Default)]
struct Wire {
    to_server: VecDeque<String>,
    to_user: Vec<String>,
    connected: bool,
}

/// In-memory client connection; the test keeps one clone as the user end
#[derive(Clone)]
pub struct TestConnection {
    wire: Arc<Mutex<Wire>>,
}

impl Default for TestConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConnection {
    pub fn new() -> Self {
        Self {
            wire: Arc::new(Mutex::new(Wire {
                connected: true,
                ..Wire::default()
            })),
        }
    }

    /// Sends a JSON frame as the user
    pub fn user_send(&self, frame: Value) {
        self.wire.lock().unwrap().to_server.push_back(frame.to_string());
    }

    /// Every push received so far, decoded
    pub fn pushes(&self) -> Vec<ClientPush> {
        self.wire
            .lock()
            .unwrap()
            .to_user
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("valid push"))
            .collect()
    }

    pub fn disconnect(&self) {
        self.wire.lock().unwrap().connected = false;
    }
}

impl ClientConnection for TestConnection {
    fn receive(&mut self) -> Option<String> {
        self.wire.lock().unwrap().to_server.pop_front()
    }

    fn send(&mut self, frame: String) {
        self.wire.lock().unwrap().to_user.push(frame);
    }

    fn is_connected(&self) -> bool {
        self.wire.lock().unwrap().connected
    }
}
