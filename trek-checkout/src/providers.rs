use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trek_core::payment::{PaymentInitiation, PaymentProviderAdapter, PaymentRecord, ProviderError, RefundReceipt};
use trek_core::session::PaymentSession;
use trek_core::{CheckoutError, CheckoutResult};

/// Payment gateways by the name checkout requests refer to them with.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn PaymentProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PaymentProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PaymentProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> CheckoutResult<Arc<dyn PaymentProviderAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| CheckoutError::Validation(format!("Unknown payment provider: {}", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Gateway stand-in for development and tests. Hands out a fake hosted
/// checkout URL and accepts every refund unless told otherwise.
#[derive(Default)]
pub struct MockPaymentAdapter {
    reject_initiation: AtomicBool,
    reject_refunds: AtomicBool,
}

impl MockPaymentAdapter {
    pub const NAME: &'static str = "mock";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_initiation(&self, reject: bool) {
        self.reject_initiation.store(reject, Ordering::SeqCst);
    }

    pub fn reject_refunds(&self, reject: bool) {
        self.reject_refunds.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProviderAdapter for MockPaymentAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initiate(&self, session: &PaymentSession) -> Result<PaymentInitiation, ProviderError> {
        if self.reject_initiation.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("Simulated gateway outage".to_string()));
        }
        Ok(PaymentInitiation {
            external_id: format!("mock_pi_{}", session.id.simple()),
            payment_url: Some(format!("https://pay.mock.local/checkout/{}", session.token)),
            client_token: Some(format!("mock_secret_{}", session.token)),
            ..Default::default()
        })
    }

    async fn refund(&self, payment: &PaymentRecord, amount_cents: i64) -> Result<RefundReceipt, ProviderError> {
        if self.reject_refunds.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected(format!(
                "refund of {} {} declined",
                amount_cents, payment.currency
            )));
        }
        Ok(RefundReceipt {
            provider_refund_id: format!("mock_re_{}", payment.id.simple()),
        })
    }
}
