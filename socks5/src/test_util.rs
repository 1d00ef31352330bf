use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{duplex, DuplexStream};

use crate::dialer::{Dialer, ProxyStream};

/// 把目标连接换成内存管道，测试拿另一端充当目标服务器
#[derive(Default)]
pub struct PipeDialer {
    dialed: Mutex<Vec<String>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl PipeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.peers.lock().unwrap().pop()
    }
}

#[async_trait]
impl Dialer for PipeDialer {
    async fn dial(&self, endpoint: &str) -> io::Result<Box<dyn ProxyStream>> {
        let (ours, theirs) = duplex(4096);
        self.dialed.lock().unwrap().push(endpoint.to_string());
        self.peers.lock().unwrap().push(theirs);
        Ok(Box::new(ours))
    }
}

pub struct FailingDialer(pub io::ErrorKind);

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, endpoint: &str) -> io::Result<Box<dyn ProxyStream>> {
        Err(io::Error::new(self.0, format!("dial {} refused by test", endpoint)))
    }
}
