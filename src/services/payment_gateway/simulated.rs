use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CreateIntentRequest, GatewayError, IntentStatus, PaymentGateway, PaymentIntent};

#[derive(Debug, Clone)]
struct SimulatedIntent {
    intent: PaymentIntent,
    captures: u32,
    cancels: u32,
}

/// In-process gateway for development and tests. With `auto_authorize` set,
/// new intents behave as if the shopper confirmed them immediately.
pub struct SimulatedGateway {
    auto_authorize: bool,
    intents: DashMap<String, SimulatedIntent>,
    queued_ids: Mutex<VecDeque<String>>,
    unavailable: AtomicBool,
}

impl SimulatedGateway {
    pub fn new(auto_authorize: bool) -> Self {
        Self {
            auto_authorize,
            intents: DashMap::new(),
            queued_ids: Mutex::new(VecDeque::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Uses `id` for the next intent instead of a generated one.
    pub fn queue_intent_id(&self, id: impl Into<String>) {
        if let Ok(mut queue) = self.queued_ids.lock() {
            queue.push_back(id.into());
        }
    }

    fn next_id(&self) -> String {
        self.queued_ids
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| format!("pi_sim_{}", Uuid::new_v4().simple()))
    }

    fn set_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        match self.intents.get_mut(intent_id) {
            Some(mut entry) => {
                entry.intent.status = status;
                true
            }
            None => false,
        }
    }

    /// Shopper completed the payment sheet.
    pub fn authorize(&self, intent_id: &str) -> bool {
        self.set_status(intent_id, IntentStatus::Authorized)
    }

    /// Shopper's card was refused.
    pub fn decline(&self, intent_id: &str, reason: &str) -> bool {
        self.set_status(intent_id, IntentStatus::Declined(reason.to_string()))
    }

    /// Makes every call fail as a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn status_of(&self, intent_id: &str) -> Option<IntentStatus> {
        self.intents
            .get(intent_id)
            .map(|entry| entry.intent.status.clone())
    }

    pub fn capture_count(&self, intent_id: &str) -> u32 {
        self.intents.get(intent_id).map(|e| e.captures).unwrap_or(0)
    }

    pub fn cancel_count(&self, intent_id: &str) -> u32 {
        self.intents.get(intent_id).map(|e| e.cancels).unwrap_or(0)
    }

    pub fn intent_count(&self) -> usize {
        self.intents.len()
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport(
                "simulated gateway unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        self.check_available()?;
        let id = self.next_id();
        let intent = PaymentIntent {
            client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            status: if self.auto_authorize {
                IntentStatus::Authorized
            } else {
                IntentStatus::Open
            },
        };
        self.intents.insert(
            id.clone(),
            SimulatedIntent {
                intent: intent.clone(),
                captures: 0,
                cancels: 0,
            },
        );
        info!(intent_id = %id, amount = %intent.amount, "Simulated payment intent created");
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.check_available()?;
        self.intents
            .get(intent_id)
            .map(|entry| entry.intent.clone())
            .ok_or_else(|| GatewayError::IntentNotFound(intent_id.to_string()))
    }

    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.check_available()?;
        let mut entry = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::IntentNotFound(intent_id.to_string()))?;
        if entry.intent.status != IntentStatus::Authorized {
            return Err(GatewayError::InvalidResponse(format!(
                "intent {} cannot be captured from {:?}",
                intent_id, entry.intent.status
            )));
        }
        entry.intent.status = IntentStatus::Captured;
        entry.captures += 1;
        debug!(intent_id, "Simulated capture");
        Ok(entry.intent.clone())
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.check_available()?;
        let mut entry = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::IntentNotFound(intent_id.to_string()))?;
        if entry.intent.status == IntentStatus::Captured {
            return Err(GatewayError::InvalidResponse(format!(
                "intent {} is already captured",
                intent_id
            )));
        }
        entry.intent.status = IntentStatus::Canceled;
        entry.cancels += 1;
        debug!(intent_id, "Simulated cancel");
        Ok(entry.intent.clone())
    }
}
