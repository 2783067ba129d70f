//! Logging wrapper around any processor
//!
//! Every handler forwards to the wrapped processor unchanged and emits a
//! `debug` event before and after.

use crate::processor::{ProcessorContext, RequestProcessor};
use crate::request::{
    CompositeRequest, CopyBranchRequest, CreateNodeRequest, DeleteBranchRequest,
    DeleteChildrenRequest, MoveBranchRequest, Operation, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadBlockOfChildrenRequest, ReadBranchRequest,
    ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest, RemovePropertyRequest,
    RenameNodeRequest, SetPropertyRequest, UpdatePropertiesRequest, VerifyNodeExistsRequest,
};
use std::time::{Duration, Instant};
use tracing::debug;

/// Whole microseconds, saturating at `u64::MAX`
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

pub struct LoggingProcessor<P> {
    delegate: P,
}

impl<P: RequestProcessor> LoggingProcessor<P> {
    pub fn new(delegate: P) -> Self {
        LoggingProcessor { delegate }
    }

    pub fn delegate(&self) -> &P {
        &self.delegate
    }

    pub fn into_inner(self) -> P {
        self.delegate
    }

    fn before<R: Operation>(&self, request: &R) {
        debug!(
            source = %self.delegate.context().source_name(),
            kind = %request.kind(),
            "Processing request"
        );
    }

    fn after<R: Operation>(&self, request: &R, started: Instant) {
        let elapsed_us = micros(started.elapsed());
        match request.error() {
            Some(err) => debug!(
                source = %self.delegate.context().source_name(),
                kind = %request.kind(),
                elapsed_us,
                error = %err,
                "Request failed"
            ),
            None if request.is_cancelled() => debug!(
                source = %self.delegate.context().source_name(),
                kind = %request.kind(),
                elapsed_us,
                "Request cancelled"
            ),
            None => debug!(
                source = %self.delegate.context().source_name(),
                kind = %request.kind(),
                elapsed_us,
                "Request processed"
            ),
        }
    }
}

macro_rules! logged {
    ($($method:ident($request:ty)),* $(,)?) => {
        $(
            fn $method(&mut self, request: &mut $request) {
                self.before(&*request);
                let started = Instant::now();
                self.delegate.$method(request);
                self.after(&*request, started);
            }
        )*
    };
}

impl<P: RequestProcessor> RequestProcessor for LoggingProcessor<P> {
    fn context(&self) -> &ProcessorContext {
        self.delegate.context()
    }

    fn context_mut(&mut self) -> &mut ProcessorContext {
        self.delegate.context_mut()
    }

    fn close(&mut self) {
        debug!(source = %self.delegate.context().source_name(), "Closing processor");
        self.delegate.close();
    }

    logged!(
        process_composite(CompositeRequest),
        read_all_children(ReadAllChildrenRequest),
        read_all_properties(ReadAllPropertiesRequest),
        create_node(CreateNodeRequest),
        update_properties(UpdatePropertiesRequest),
        delete_branch(DeleteBranchRequest),
        copy_branch(CopyBranchRequest),
        move_branch(MoveBranchRequest),
        read_node(ReadNodeRequest),
        read_property(ReadPropertyRequest),
        verify_node_exists(VerifyNodeExistsRequest),
        read_block_of_children(ReadBlockOfChildrenRequest),
        read_next_block_of_children(ReadNextBlockOfChildrenRequest),
        read_branch(ReadBranchRequest),
        set_property(SetPropertyRequest),
        remove_property(RemovePropertyRequest),
        delete_children(DeleteChildrenRequest),
        rename_node(RenameNodeRequest),
    );
}
