use super::{
    command::WriteRequest,
    registers::{self, RegisterBlock, RegisterKind},
};
use crate::config::ModbusConfig;
use anyhow::Context as _;
use std::{borrow::Cow, time::Duration};
use thiserror::Error;
use tokio::{net, time};
use tokio_modbus::{
    client::{tcp, Client, Context, Reader},
    ExceptionCode, Request, Response, Slave,
};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("no open session")]
    NotConnected,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Modbus(#[from] tokio_modbus::Error),
    #[error("device answered with exception {0:?}")]
    Exception(ExceptionCode),
    #[error("unexpected response to function {expected:#04x}: {response}")]
    UnexpectedResponse { expected: u8, response: String },
    #[error("rx byte count mismatch: announced {announced}, received {received}")]
    ByteCountMismatch { announced: usize, received: usize },
}

/// Register level access to the inverter.
///
/// A session is opened and closed around every batch of requests. Reads
/// report any failure as an absent block.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn open(&mut self) -> bool;
    async fn close(&mut self);
    async fn read_block(&mut self, block: RegisterBlock) -> Option<Vec<u16>>;
    async fn write_work_mode(&mut self, request: WriteRequest) -> Result<u16, WriteError>;
}

pub fn encode_work_mode_request(request: WriteRequest) -> [u8; 4] {
    let [addr_hi, addr_lo] = request.address.to_be_bytes();
    let [value_hi, value_lo] = request.value.to_be_bytes();
    [addr_hi, addr_lo, value_hi, value_lo]
}

/// Checks the body of a work mode response (everything after the function
/// code) and returns the echoed register.
pub fn decode_work_mode_response(data: &[u8]) -> Result<u16, WriteError> {
    let Some((&byte_count, registers)) = data.split_first() else {
        return Err(WriteError::ByteCountMismatch { announced: 0, received: 0 });
    };

    let announced = usize::from(byte_count);
    if announced < 2 || announced != registers.len() {
        return Err(WriteError::ByteCountMismatch { announced, received: registers.len() });
    }

    Ok(u16::from_be_bytes([registers[0], registers[1]]))
}

/// Modbus TCP session to a Sofar inverter.
pub struct SofarClient {
    host: String,
    port: u16,
    slave: Slave,
    timeout: Duration,
    ctx: Option<Context>,
}

impl SofarClient {
    pub fn new(config: &ModbusConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            slave: Slave(config.sofar_slave_id),
            timeout: Duration::from_secs(config.timeout_secs),
            ctx: None,
        }
    }

    async fn connect(&mut self) -> anyhow::Result<Context> {
        let addr = net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", self.host, self.port))?;

        let ctx = time::timeout(self.timeout, tcp::connect_slave(addr, self.slave))
            .await
            .with_context(|| format!("Connecting to {addr} timed out"))?
            .with_context(|| format!("Failed to connect to {addr}"))?;

        Ok(ctx)
    }
}

impl Transport for SofarClient {
    async fn open(&mut self) -> bool {
        if self.ctx.is_some() {
            return true;
        }

        match self.connect().await {
            Ok(ctx) => {
                log::trace!("Opened modbus session to {}:{}", self.host, self.port);
                self.ctx = Some(ctx);
                true
            },
            Err(e) => {
                log::warn!("Unable to open modbus session: {e:#}");
                false
            },
        }
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                log::debug!("Error while closing modbus session: {e}");
            }
            log::trace!("Closed modbus session to {}:{}", self.host, self.port);
        }
    }

    async fn read_block(&mut self, block: RegisterBlock) -> Option<Vec<u16>> {
        let ctx = self.ctx.as_mut()?;

        let request = async {
            match block.kind {
                RegisterKind::Holding => ctx.read_holding_registers(block.start, block.count).await,
                RegisterKind::Input => ctx.read_input_registers(block.start, block.count).await,
            }
        };

        match time::timeout(self.timeout, request).await {
            Ok(Ok(Ok(words))) => {
                log::trace!("Read {block:?}: {words:?}");
                Some(words)
            },
            Ok(Ok(Err(code))) => {
                log::warn!("Reading {block:?} failed with exception {code:?}");
                None
            },
            Ok(Err(e)) => {
                log::warn!("Reading {block:?} failed: {e}");
                None
            },
            Err(_) => {
                log::warn!("Reading {block:?} timed out after {:?}", self.timeout);
                None
            },
        }
    }

    async fn write_work_mode(&mut self, request: WriteRequest) -> Result<u16, WriteError> {
        let ctx = self.ctx.as_mut().ok_or(WriteError::NotConnected)?;

        let pdu = encode_work_mode_request(request);
        let call = ctx.call(Request::Custom(registers::WORK_MODE_FUNCTION, Cow::Borrowed(&pdu[..])));

        let response = time::timeout(self.timeout, call)
            .await
            .map_err(|_| WriteError::Timeout(self.timeout))??
            .map_err(WriteError::Exception)?;

        match response {
            Response::Custom(registers::WORK_MODE_FUNCTION, data) => decode_work_mode_response(&data),
            other => Err(WriteError::UnexpectedResponse {
                expected: registers::WORK_MODE_FUNCTION,
                response: format!("{other:?}"),
            }),
        }
    }
}
