//! Timing-extension hooks.
//!
//! The port state machine calls into an [`Extension`] at fixed points. Every hook has a no-op
//! default, so an extension only implements what it needs and [`NoExtension`] implements
//! nothing. Any hook that returns an [`ExtensionError`] sends the port to FAULTY.
//!
//! Hooks receive the [`PortInstance`] so they can read the in-flight [`Exchange`], arm their own
//! `Ext*` timeouts and inspect the state.
//!
//! [`Exchange`]: crate::port::Exchange

use crate::datasets::ClockContext;
use crate::foreign::ForeignMasterRecord;
use crate::message::{Message, SignalingMessage};
use crate::port::PortInstance;
use crate::portstate::PortState;
use crate::time::TimeStamp;
use crate::wire::MessageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionError {
    /// The extension hit a condition it cannot recover from without a port reset.
    Failed,
    /// The collaborator the extension drives refused the operation.
    Rejected,
}

pub type ExtensionResult<T> = core::result::Result<T, ExtensionError>;

/// What the state machine does after a hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    /// Run the default handling.
    Continue,
    /// The extension handled it. Skip the default handling.
    Done,
    /// Skip the default handling and move to this state.
    Transition(PortState),
}

pub trait Extension {
    /// Once per port, before the first state-machine pass.
    fn open(&mut self, _clock: &ClockContext, _port: &mut PortInstance) -> ExtensionResult<()> {
        Ok(())
    }

    /// On every entry into INITIALIZING.
    fn init(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        Ok(())
    }

    /// On every pass through LISTENING, before the receipt timer is checked.
    fn listening(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        Ok(())
    }

    /// First look at every message received in MASTER or PRE_MASTER.
    ///
    /// Return the type the default handler should process, or `None` when the message was
    /// consumed. The extension may rewrite the message in place.
    fn master_msg(
        &mut self,
        _port: &mut PortInstance,
        msg: &mut Message<'_>,
        _ingress: TimeStamp,
    ) -> ExtensionResult<Option<MessageType>> {
        Ok(Some(msg.header.message_type))
    }

    /// On every entry into SLAVE or UNCALIBRATED.
    fn new_slave(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        Ok(())
    }

    /// After the BMC synchronized the clock datasets to `erbest`.
    fn s1(
        &mut self,
        _clock: &ClockContext,
        _port: &mut PortInstance,
        _erbest: &ForeignMasterRecord,
    ) -> ExtensionResult<()> {
        Ok(())
    }

    /// After an Announce from the current parent was processed in SLAVE or UNCALIBRATED.
    fn handle_announce(&mut self, _port: &mut PortInstance) -> ExtensionResult<()> {
        Ok(())
    }

    /// After T2 of a Sync was captured.
    fn handle_sync(
        &mut self,
        _port: &mut PortInstance,
        _ingress: TimeStamp,
    ) -> ExtensionResult<()> {
        Ok(())
    }

    /// After T1 was captured, before the servo runs.
    fn handle_followup(&mut self, _port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// After T4 of a matching Delay_Resp was captured, before the servo runs.
    fn handle_resp(&mut self, _port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// Before a Pdelay_Req is answered. The extension may rewrite the request.
    fn handle_preq(
        &mut self,
        _port: &mut PortInstance,
        _msg: &mut Message<'_>,
        _ingress: TimeStamp,
    ) -> ExtensionResult<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// After T3..T6 of a peer-delay exchange were captured, before the servo runs.
    fn handle_presp(&mut self, _port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// Append TLVs to an outgoing Announce. Returns the number of bytes written to `buf`.
    fn pack_announce(&mut self, _port: &PortInstance, _buf: &mut [u8]) -> usize {
        0
    }

    /// Parse the TLVs of a received Announce. The result is kept in the foreign master record.
    fn unpack_announce(&mut self, _port: &mut PortInstance, _tlvs: &[u8]) -> u16 {
        0
    }

    /// Every pass in SLAVE or UNCALIBRATED, before default handling.
    fn execute_slave(&mut self, _port: &mut PortInstance) -> ExtensionResult<HookFlow> {
        Ok(HookFlow::Continue)
    }

    /// Extension deadline in milliseconds, folded into the port's next delay.
    fn calc_timeout(&self, _port: &PortInstance) -> Option<u32> {
        None
    }

    /// Signaling messages the base protocol does not interpret.
    fn handle_signaling(
        &mut self,
        _port: &mut PortInstance,
        _msg: &SignalingMessage<'_>,
    ) -> ExtensionResult<()> {
        Ok(())
    }
}

/// Plain IEEE 1588 without extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtension;

impl Extension for NoExtension {}
