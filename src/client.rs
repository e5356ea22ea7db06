//! Controller-side client for the stream transport
//!
//! Keeps one connection open for many calls and closes it with the empty-line
//! terminator.

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
};

use crate::errors::ClientError;
use crate::rpc::envelope::{encode_request, Request, Response, LINE_TERMINATOR};

pub struct StreamClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl StreamClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        // Strict request/response alternation gains nothing from Nagle.
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 0,
        })
    }

    /// Sends one call with the next request id and waits for its response.
    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Response, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&Request::new(method, params, id)).await?;
        self.receive().await
    }

    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let bytes = encode_request(request)?;
        self.send_raw(&bytes).await
    }

    /// Writes bytes as-is; the caller supplies the line terminator.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Response, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// True once the server has closed its side of the connection.
    pub async fn is_closed_by_server(&mut self) -> Result<bool, ClientError> {
        let mut line = String::new();
        Ok(self.reader.read_line(&mut line).await? == 0)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.send_raw(&[LINE_TERMINATOR]).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
