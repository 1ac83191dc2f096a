//! In-memory [`Session`] used to exercise the dispatcher and the poll loop without a server

use rodbus::{AddressRange, UnitId};

use crate::error::TransportError;
use crate::session::{RegisterSpace, Session};

const SPACE_SIZE: usize = u16::MAX as usize + 1;

/// A request received by a [`MockSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    /// read coils
    ReadCoils(AddressRange),
    /// read discrete inputs
    ReadDiscreteInputs(AddressRange),
    /// read registers in a space
    ReadRegisters(RegisterSpace, AddressRange),
    /// write coils starting at an address
    WriteCoils(u16, Vec<bool>),
    /// write holding registers starting at an address
    WriteRegisters(u16, Vec<u16>),
}

/// A session backed by in-memory images of the four address spaces
#[derive(Debug)]
pub struct MockSession {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    unit_id: Option<UnitId>,
    requests: Vec<MockRequest>,
    remaining_successes: Option<usize>,
    closed: bool,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    /// Create a session where every value is zero
    pub fn new() -> Self {
        Self {
            coils: vec![false; SPACE_SIZE],
            discrete_inputs: vec![false; SPACE_SIZE],
            holding_registers: vec![0; SPACE_SIZE],
            input_registers: vec![0; SPACE_SIZE],
            unit_id: None,
            requests: Vec::new(),
            remaining_successes: None,
            closed: false,
        }
    }

    /// Set coils starting at a wire address
    pub fn with_coils(mut self, start: u16, values: &[bool]) -> Self {
        copy_into(&mut self.coils, start, values);
        self
    }

    /// Set discrete inputs starting at a wire address
    pub fn with_discrete_inputs(mut self, start: u16, values: &[bool]) -> Self {
        copy_into(&mut self.discrete_inputs, start, values);
        self
    }

    /// Set holding registers starting at a wire address
    pub fn with_holding_registers(mut self, start: u16, values: &[u16]) -> Self {
        copy_into(&mut self.holding_registers, start, values);
        self
    }

    /// Set input registers starting at a wire address
    pub fn with_input_registers(mut self, start: u16, values: &[u16]) -> Self {
        copy_into(&mut self.input_registers, start, values);
        self
    }

    /// Let `count` requests succeed, then time out every request after that
    pub fn fail_after(mut self, count: usize) -> Self {
        self.remaining_successes = Some(count);
        self
    }

    /// Unit identifier set by the caller, if any
    pub fn unit_id(&self) -> Option<UnitId> {
        self.unit_id
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> &[MockRequest] {
        &self.requests
    }

    /// True once [`Session::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current holding register values of a range
    pub fn holding_registers(&self, range: AddressRange) -> &[u16] {
        &self.holding_registers[range.to_std_range()]
    }

    /// Current coil values of a range
    pub fn coils(&self, range: AddressRange) -> &[bool] {
        &self.coils[range.to_std_range()]
    }

    fn record(&mut self, request: MockRequest) -> Result<(), TransportError> {
        self.requests.push(request);
        match self.remaining_successes.as_mut() {
            Some(0) => Err(TransportError::Timeout),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn copy_into<T: Copy>(image: &mut [T], start: u16, values: &[T]) {
    let start = usize::from(start);
    let end = (start + values.len()).min(image.len());
    image[start..end].copy_from_slice(&values[..end - start]);
}

impl Session for MockSession {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        self.unit_id = Some(unit_id);
    }

    async fn read_coils(&mut self, range: AddressRange) -> Result<Vec<bool>, TransportError> {
        self.record(MockRequest::ReadCoils(range))?;
        Ok(self.coils[range.to_std_range()].to_vec())
    }

    async fn read_discrete_inputs(
        &mut self,
        range: AddressRange,
    ) -> Result<Vec<bool>, TransportError> {
        self.record(MockRequest::ReadDiscreteInputs(range))?;
        Ok(self.discrete_inputs[range.to_std_range()].to_vec())
    }

    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, TransportError> {
        self.record(MockRequest::ReadRegisters(space, range))?;
        let image = match space {
            RegisterSpace::Input => &self.input_registers,
            RegisterSpace::Holding => &self.holding_registers,
        };
        Ok(image[range.to_std_range()].to_vec())
    }

    async fn write_coils(&mut self, start: u16, values: Vec<bool>) -> Result<(), TransportError> {
        self.record(MockRequest::WriteCoils(start, values.clone()))?;
        copy_into(&mut self.coils, start, &values);
        Ok(())
    }

    async fn write_registers(
        &mut self,
        start: u16,
        values: Vec<u16>,
    ) -> Result<(), TransportError> {
        self.record(MockRequest::WriteRegisters(start, values.clone()))?;
        copy_into(&mut self.holding_registers, start, &values);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_configured_registers() {
        let mut session = MockSession::new().with_holding_registers(10, &[1, 2, 3]);
        let range = AddressRange::try_from(10, 3).unwrap();
        let values = tokio_test::block_on(session.read_registers(RegisterSpace::Holding, range));
        assert_eq!(values.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            session.requests(),
            &[MockRequest::ReadRegisters(RegisterSpace::Holding, range)]
        );
    }

    #[test]
    fn fails_after_configured_successes() {
        let mut session = MockSession::new().fail_after(1);
        let range = AddressRange::try_from(0, 1).unwrap();
        assert!(tokio_test::block_on(session.read_coils(range)).is_ok());
        assert!(matches!(
            tokio_test::block_on(session.read_coils(range)),
            Err(TransportError::Timeout)
        ));
    }

    #[test]
    fn values_past_the_end_are_dropped() {
        let session = MockSession::new().with_holding_registers(u16::MAX, &[7, 8]);
        let range = AddressRange::try_from(u16::MAX, 1).unwrap();
        assert_eq!(session.holding_registers(range), &[7]);
    }
}
