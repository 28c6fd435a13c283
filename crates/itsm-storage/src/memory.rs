use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use itsm_core::{CanonicalTicket, Customer, Engineer, TechTimeSpent, Worklog};
use tokio::sync::Mutex;

use crate::{require_id, StoreError, StoreTxn, TicketStore, UpsertOutcome};

#[derive(Debug, Default)]
struct MemoryState {
    tickets: BTreeMap<String, CanonicalTicket>,
    customers: BTreeMap<String, Customer>,
    engineers: BTreeMap<String, Engineer>,
    time_spent: BTreeMap<String, TechTimeSpent>,
    worklogs: BTreeMap<i64, Worklog>,
}

/// In-process store for dry runs and tests. Writes are staged per batch and
/// applied with the same merge rule as the Postgres upsert.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tickets(&self) -> Vec<CanonicalTicket> {
        self.state.lock().await.tickets.values().cloned().collect()
    }

    pub async fn customers(&self) -> Vec<Customer> {
        self.state.lock().await.customers.values().cloned().collect()
    }

    pub async fn engineers(&self) -> Vec<Engineer> {
        self.state.lock().await.engineers.values().cloned().collect()
    }

    pub async fn time_spent(&self) -> Vec<TechTimeSpent> {
        self.state.lock().await.time_spent.values().cloned().collect()
    }

    /// Ordered by remote id.
    pub async fn worklogs(&self) -> Vec<Worklog> {
        self.state.lock().await.worklogs.values().cloned().collect()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        Ok(Box::new(MemoryTxn {
            state: Arc::clone(&self.state),
            tickets: BTreeMap::new(),
            customers: BTreeMap::new(),
            engineers: BTreeMap::new(),
            time_spent: BTreeMap::new(),
            worklogs: BTreeMap::new(),
        }))
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<CanonicalTicket>, StoreError> {
        Ok(self.state.lock().await.tickets.get(id).cloned())
    }

    async fn count_tickets(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.tickets.len() as i64)
    }

    async fn last_worklog_id(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.worklogs.keys().next_back().copied().unwrap_or(0))
    }
}

struct MemoryTxn {
    state: Arc<Mutex<MemoryState>>,
    tickets: BTreeMap<String, CanonicalTicket>,
    customers: BTreeMap<String, Customer>,
    engineers: BTreeMap<String, Engineer>,
    time_spent: BTreeMap<String, TechTimeSpent>,
    worklogs: BTreeMap<i64, Worklog>,
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn upsert_ticket(&mut self, ticket: &CanonicalTicket) -> Result<UpsertOutcome, StoreError> {
        require_id("ticket", &ticket.id)?;
        if let Some(staged) = self.tickets.get_mut(&ticket.id) {
            *staged = staged.merged_with(ticket);
            return Ok(UpsertOutcome::Updated);
        }

        let committed = self.state.lock().await.tickets.get(&ticket.id).cloned();
        let (row, outcome) = match committed {
            Some(stored) => (stored.merged_with(ticket), UpsertOutcome::Updated),
            None => (ticket.clone(), UpsertOutcome::Inserted),
        };
        self.tickets.insert(ticket.id.clone(), row);
        Ok(outcome)
    }

    async fn upsert_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        require_id("customer", &customer.id)?;
        self.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn upsert_engineer(&mut self, engineer: &Engineer) -> Result<(), StoreError> {
        require_id("engineer", &engineer.id)?;
        self.engineers.insert(engineer.id.clone(), engineer.clone());
        Ok(())
    }

    async fn upsert_time_spent(&mut self, entry: &TechTimeSpent) -> Result<UpsertOutcome, StoreError> {
        require_id("assessment", &entry.assessment_id)?;
        let known = self.time_spent.contains_key(&entry.assessment_id)
            || self.state.lock().await.time_spent.contains_key(&entry.assessment_id);
        self.time_spent.insert(entry.assessment_id.clone(), entry.clone());
        Ok(if known {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn insert_worklog(&mut self, worklog: &Worklog) -> Result<bool, StoreError> {
        require_id("worklog ticket", &worklog.ticket_id)?;
        if self.worklogs.contains_key(&worklog.remote_id)
            || self.state.lock().await.worklogs.contains_key(&worklog.remote_id)
        {
            return Ok(false);
        }
        self.worklogs.insert(worklog.remote_id, worklog.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTxn {
            state,
            tickets,
            customers,
            engineers,
            time_spent,
            worklogs,
        } = *self;
        let mut state = state.lock().await;

        for (id, staged) in tickets {
            // Another batch may have committed since this one staged the row.
            let row = match state.tickets.get(&id) {
                Some(current) => current.merged_with(&staged),
                None => staged,
            };
            state.tickets.insert(id, row);
        }
        for (id, customer) in customers {
            state.customers.insert(id, customer);
        }
        for (id, engineer) in engineers {
            match state.engineers.get_mut(&id) {
                Some(current) => current.name = engineer.name,
                None => {
                    state.engineers.insert(id, engineer);
                }
            }
        }
        state.time_spent.extend(time_spent);
        for (id, worklog) in worklogs {
            state.worklogs.entry(id).or_insert(worklog);
        }
        Ok(())
    }
}
