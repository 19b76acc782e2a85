// Boundary to the downstream directory: the only way changes leave this crate.
use crate::core::error::Error;
use crate::core::key::Operation;
use crate::core::principal::Principal;

/// Synchronously applies one change downstream.
///
/// Implementations report a rejected or unreachable downstream as
/// `ErrorKind::Delivery`; any other kind is treated as fatal by callers.
pub trait Delivery {
    fn deliver(
        &self,
        account: &Principal,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<(), Error>;
}

impl<D: Delivery + ?Sized> Delivery for &D {
    fn deliver(
        &self,
        account: &Principal,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<(), Error> {
        (**self).deliver(account, operation, password)
    }
}
