use std::{future::Future, pin::Pin, sync::Arc};

use tokio::task::JoinHandle;

use crate::{
    events::{
        EventBus,
        EventHandler,
        Handler,
        InvoiceDataChangedEvent,
        InvoicePaymentEvent,
        InvoiceStatusChangedEvent,
    },
    shutdown::Shutdown,
};

pub struct EventHandlers {
    pub on_invoice_status_changed: Option<EventHandler<InvoiceStatusChangedEvent>>,
    pub on_invoice_payment: Option<EventHandler<InvoicePaymentEvent>>,
    pub on_invoice_data_changed: Option<EventHandler<InvoiceDataChangedEvent>>,
}

impl EventHandlers {
    /// Subscribes every configured hook to the bus. Events published after this call will reach the hooks once
    /// [`Self::start_handlers`] is called.
    pub fn new(bus: &EventBus, hooks: EventHooks) -> Self {
        let on_invoice_status_changed =
            hooks.on_invoice_status_changed.map(|f| EventHandler::new(bus.subscribe(), f));
        let on_invoice_payment = hooks.on_invoice_payment.map(|f| EventHandler::new(bus.subscribe(), f));
        let on_invoice_data_changed = hooks.on_invoice_data_changed.map(|f| EventHandler::new(bus.subscribe(), f));
        Self { on_invoice_status_changed, on_invoice_payment, on_invoice_data_changed }
    }

    pub fn start_handlers(self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(handler) = self.on_invoice_status_changed {
            handles.push(tokio::spawn(handler.start_handler(shutdown.clone())));
        }
        if let Some(handler) = self.on_invoice_payment {
            handles.push(tokio::spawn(handler.start_handler(shutdown.clone())));
        }
        if let Some(handler) = self.on_invoice_data_changed {
            handles.push(tokio::spawn(handler.start_handler(shutdown)));
        }
        handles
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_invoice_status_changed: Option<Handler<InvoiceStatusChangedEvent>>,
    pub on_invoice_payment: Option<Handler<InvoicePaymentEvent>>,
    pub on_invoice_data_changed: Option<Handler<InvoiceDataChangedEvent>>,
}

impl EventHooks {
    pub fn on_invoice_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceStatusChangedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_invoice_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_payment<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoicePaymentEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_invoice_payment = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_data_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceDataChangedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_invoice_data_changed = Some(Arc::new(f));
        self
    }
}
