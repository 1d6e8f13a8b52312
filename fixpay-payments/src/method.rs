//! Payment methods and their charge schemes
//!
//! The method a customer picks decides which charge scheme the gateway sees.
//! The set is closed: [`PaymentMethod::channel`] matches every method
//! exhaustively and each scheme has a single constructor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Methods offered at the counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    /// Virtual account at the configured default bank
    BankTransfer,
    BcaVa,
    BniVa,
    BriVa,
    PermataVa,
    MandiriEchannel,
    Gopay,
    Ovo,
    Dana,
    Shopeepay,
    Qris,
    Alfamart,
    Indomaret,
    CreditCard,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 15] = [
        Self::Cash,
        Self::BankTransfer,
        Self::BcaVa,
        Self::BniVa,
        Self::BriVa,
        Self::PermataVa,
        Self::MandiriEchannel,
        Self::Gopay,
        Self::Ovo,
        Self::Dana,
        Self::Shopeepay,
        Self::Qris,
        Self::Alfamart,
        Self::Indomaret,
        Self::CreditCard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::BankTransfer => "bank_transfer",
            Self::BcaVa => "bca_va",
            Self::BniVa => "bni_va",
            Self::BriVa => "bri_va",
            Self::PermataVa => "permata_va",
            Self::MandiriEchannel => "mandiri_echannel",
            Self::Gopay => "gopay",
            Self::Ovo => "ovo",
            Self::Dana => "dana",
            Self::Shopeepay => "shopeepay",
            Self::Qris => "qris",
            Self::Alfamart => "alfamart",
            Self::Indomaret => "indomaret",
            Self::CreditCard => "credit_card",
        }
    }

    /// Parse from the wire name
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|method| method.as_str() == s)
    }

    pub fn is_cash(&self) -> bool {
        matches!(self, Self::Cash)
    }

    /// Resolve the channel used to collect this method
    pub fn channel(&self, ctx: &SchemeContext) -> Channel {
        let scheme = match self {
            Self::Cash => return Channel::Counter,
            Self::BankTransfer => ChargeScheme::virtual_account(ctx.default_bank),
            Self::BcaVa => ChargeScheme::virtual_account(Bank::Bca),
            Self::BniVa => ChargeScheme::virtual_account(Bank::Bni),
            Self::BriVa => ChargeScheme::virtual_account(Bank::Bri),
            Self::PermataVa => ChargeScheme::virtual_account(Bank::Permata),
            Self::MandiriEchannel => ChargeScheme::echannel(&ctx.order_number),
            Self::Gopay => ChargeScheme::e_wallet(EWallet::Gopay, ctx.callback_url.clone()),
            Self::Ovo => ChargeScheme::e_wallet(EWallet::Ovo, ctx.callback_url.clone()),
            Self::Dana => ChargeScheme::e_wallet(EWallet::Dana, ctx.callback_url.clone()),
            Self::Shopeepay => {
                ChargeScheme::e_wallet(EWallet::Shopeepay, ctx.callback_url.clone())
            }
            Self::Qris => ChargeScheme::qris(&ctx.qris_acquirer),
            Self::Alfamart => ChargeScheme::over_the_counter(Store::Alfamart, &ctx.order_number),
            Self::Indomaret => {
                ChargeScheme::over_the_counter(Store::Indomaret, &ctx.order_number)
            }
            Self::CreditCard => ChargeScheme::credit_card(),
        };
        Channel::Gateway(scheme)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a payment is collected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Settled at the counter, never sent to the gateway
    Counter,
    /// Charged through the gateway with the given scheme
    Gateway(ChargeScheme),
}

/// Inputs a scheme needs beyond the method itself
#[derive(Debug, Clone)]
pub struct SchemeContext {
    pub order_number: String,
    pub default_bank: Bank,
    pub callback_url: Option<String>,
    pub qris_acquirer: String,
}

/// Virtual account banks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    #[default]
    Bca,
    Bni,
    Bri,
    Permata,
}

impl Bank {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Bca => "bca",
            Self::Bni => "bni",
            Self::Bri => "bri",
            Self::Permata => "permata",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "bca" => Some(Self::Bca),
            "bni" => Some(Self::Bni),
            "bri" => Some(Self::Bri),
            "permata" => Some(Self::Permata),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EWallet {
    Gopay,
    Ovo,
    Dana,
    Shopeepay,
}

impl EWallet {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Gopay => "gopay",
            Self::Ovo => "ovo",
            Self::Dana => "dana",
            Self::Shopeepay => "shopeepay",
        }
    }
}

/// Convenience store chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Alfamart,
    Indomaret,
}

impl Store {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Alfamart => "alfamart",
            Self::Indomaret => "indomaret",
        }
    }
}

/// Method-specific part of a charge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeScheme {
    VirtualAccount {
        bank: Bank,
    },
    Echannel {
        bill_info1: String,
        bill_info2: String,
    },
    EWallet {
        wallet: EWallet,
        callback_url: Option<String>,
    },
    Qris {
        acquirer: String,
    },
    OverTheCounter {
        store: Store,
        message: String,
    },
    CreditCard {
        secure: bool,
        save_token: bool,
    },
}

impl ChargeScheme {
    pub fn virtual_account(bank: Bank) -> Self {
        Self::VirtualAccount { bank }
    }

    pub fn echannel(order_number: &str) -> Self {
        Self::Echannel {
            bill_info1: format!("Order #{order_number}"),
            bill_info2: "iPhone Service".to_string(),
        }
    }

    pub fn e_wallet(wallet: EWallet, callback_url: Option<String>) -> Self {
        Self::EWallet {
            wallet,
            callback_url,
        }
    }

    pub fn qris(acquirer: &str) -> Self {
        Self::Qris {
            acquirer: acquirer.to_string(),
        }
    }

    pub fn over_the_counter(store: Store, order_number: &str) -> Self {
        Self::OverTheCounter {
            store,
            message: format!("Bayar pesanan #{order_number}"),
        }
    }

    /// 3-D Secure on, token not stored
    pub fn credit_card() -> Self {
        Self::CreditCard {
            secure: true,
            save_token: false,
        }
    }

    /// Gateway `payment_type` for this scheme
    pub fn payment_type(&self) -> &'static str {
        match self {
            Self::VirtualAccount { .. } => "bank_transfer",
            Self::Echannel { .. } => "echannel",
            Self::EWallet { wallet, .. } => wallet.code(),
            Self::Qris { .. } => "qris",
            Self::OverTheCounter { .. } => "cstore",
            Self::CreditCard { .. } => "credit_card",
        }
    }
}
