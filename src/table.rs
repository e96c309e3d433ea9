use std::future::Future;

use crate::{
    Client, Error,
    records::{ListRecords, ListRecordsParams, Table},
    transport::Transport,
};

/// A table selected from a [Client]'s base.
///
/// Handles are cheap and immutable; select as many as you like.
#[derive(Debug, Clone)]
pub struct TableHandle<'a, T> {
    client: &'a Client<T>,
    name: String,
}

impl<'a, T: Transport> TableHandle<'a, T> {
    pub(crate) fn new(client: &'a Client<T>, name: String) -> Self {
        Self { client, name }
    }

    /// The table name (or ID) this handle addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the first page of records, with the API's default ordering and
    /// page size.
    pub async fn get(&self, cancel: impl Future<Output = ()>) -> Result<Table, Error> {
        self.fetch(cancel, None).await
    }

    /// Fetch a page of records matching `params`. To continue listing, pass
    /// the returned [Table::offset] back in [ListRecordsParams::offset].
    pub async fn list(
        &self,
        cancel: impl Future<Output = ()>,
        params: &ListRecordsParams,
    ) -> Result<Table, Error> {
        self.fetch(cancel, Some(params)).await
    }

    async fn fetch(
        &self,
        cancel: impl Future<Output = ()>,
        params: Option<&ListRecordsParams>,
    ) -> Result<Table, Error> {
        let req = ListRecords {
            table: &self.name,
            params,
        };

        let mut table = self.client.execute(cancel, req).await?;
        table.name = self.name.clone();
        Ok(table)
    }
}
