use std::{mem, ptr::NonNull, slice};

/// Teardown action run by [`RegionPool::destroy`](crate::RegionPool::destroy).
/// It receives the record's data pointer.
pub type CleanupHandler = Box<dyn FnOnce(Option<NonNull<u8>>) + Send>;

/// Pool bytes reserved for each registered cleanup (handler, data, next link).
pub(crate) const CLEANUP_NODE_SIZE: usize = 3 * mem::size_of::<usize>();

/// A registered teardown callback.
///
/// Returned by [`RegionPool::cleanup_add`](crate::RegionPool::cleanup_add).
/// The handler is optional; a record without one is skipped at destroy.
pub struct Cleanup {
  handler: Option<CleanupHandler>,
  data: Option<NonNull<u8>>,
  payload: Option<NonNull<u8>>,
  payload_size: usize,
}

// The payload lives in the owning pool, which is itself only `Send`.
unsafe impl Send for Cleanup {}

impl Cleanup {
  pub(crate) fn new(
    payload: Option<NonNull<u8>>,
    payload_size: usize,
  ) -> Self {
    Self {
      handler: None,
      data: payload,
      payload,
      payload_size,
    }
  }

  pub fn set_handler(
    &mut self,
    handler: impl FnOnce(Option<NonNull<u8>>) + Send + 'static,
  ) {
    self.handler = Some(Box::new(handler));
  }

  pub fn has_handler(&self) -> bool {
    self.handler.is_some()
  }

  /// Pointer handed to the handler. Starts out as the payload.
  pub fn data(&self) -> Option<NonNull<u8>> {
    self.data
  }

  /// Points the handler at something other than the pool payload.
  pub fn set_data(
    &mut self,
    data: Option<NonNull<u8>>,
  ) {
    self.data = data;
  }

  /// The payload bytes reserved from the pool at registration.
  pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
    self
      .payload
      .map(|ptr| unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.payload_size) })
  }

  pub(crate) fn run(self) {
    if let Some(handler) = self.handler {
      handler(self.data);
    }
  }
}
