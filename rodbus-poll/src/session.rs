use rodbus::{AddressRange, UnitId};

use crate::codec::WordOrder;
use crate::error::TransportError;

/// Register address space targeted by a register read
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterSpace {
    /// read-only input registers (function code 0x04)
    Input,
    /// read/write holding registers (function code 0x03)
    Holding,
}

/// An open connection to a single Modbus server
///
/// Every request is addressed to the unit set with [`Session::set_unit_id`]. Results contain
/// exactly one value per address of the requested range, or the request fails as a whole.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Address subsequent requests to this unit
    fn set_unit_id(&mut self, unit_id: UnitId);

    /// Read coils (function code 0x01)
    async fn read_coils(&mut self, range: AddressRange) -> Result<Vec<bool>, TransportError>;

    /// Read discrete inputs (function code 0x02)
    async fn read_discrete_inputs(
        &mut self,
        range: AddressRange,
    ) -> Result<Vec<bool>, TransportError>;

    /// Read holding (0x03) or input (0x04) registers
    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write multiple coils (function code 0x0F)
    async fn write_coils(&mut self, start: u16, values: Vec<bool>) -> Result<(), TransportError>;

    /// Write multiple holding registers (function code 0x10)
    async fn write_registers(&mut self, start: u16, values: Vec<u16>)
        -> Result<(), TransportError>;

    /// Release the underlying connection
    async fn close(&mut self);
}

/// A session with its unit identifier and word order fixed for the rest of the run
#[derive(Debug)]
pub struct BoundSession<S> {
    session: S,
    word_order: WordOrder,
}

impl<S: Session> BoundSession<S> {
    /// Bind the unit identifier and the word order to an open session
    pub fn bind(mut session: S, unit_id: UnitId, word_order: WordOrder) -> Self {
        session.set_unit_id(unit_id);
        Self {
            session,
            word_order,
        }
    }

    /// Word order used to pack and unpack 32-bit values
    pub fn word_order(&self) -> WordOrder {
        self.word_order
    }

    /// Access the underlying session
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    /// Close the session and give it back
    pub async fn close(mut self) -> S {
        self.session.close().await;
        self.session
    }
}
