use ledger_core::{Ledger, LedgerConfig, Transaction};

pub fn initialized_ledger(difficulty: usize) -> Ledger {
    let mut ledger =
        Ledger::new(LedgerConfig::with_difficulty(difficulty)).expect("valid config");
    ledger.init().expect("genesis mined");
    ledger
}

pub fn tx(sender: &str, recipient: &str, amount: f64) -> Transaction {
    Transaction::new(sender, recipient, amount)
}
