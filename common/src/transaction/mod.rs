use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::{
    amount::Amount,
    crypto::Hash,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

mod payload;

pub use payload::*;

// Marker preceding every custom transaction payload
pub const CUSTOM_TX_MAGIC: [u8; 4] = *b"DfTx";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum CustomTxType {
    CreateToken,
    MintToken,
    BurnToken,
    UpdateToken,
    UtxosToAccount,
    AccountToUtxos,
    AccountToAccount,
    AnyAccountsToAccounts,
    CreatePoolPair,
    UpdatePoolPair,
    PoolSwap,
    PoolSwapV2,
    AddPoolLiquidity,
    RemovePoolLiquidity,
    SetGovVariable,
    SetGovVariableHeight,
    AppointOracle,
    RemoveOracle,
    UpdateOracle,
    SetOracleData,
    SetCollateralToken,
    SetLoanToken,
    UpdateLoanToken,
    LoanScheme,
    DefaultLoanScheme,
    DestroyLoanScheme,
    Vault,
    CloseVault,
    UpdateVault,
    DepositToVault,
    WithdrawFromVault,
    TakeLoan,
    PaybackLoan,
    AuctionBid,
    CreateCfp,
    CreateVoc,
    Vote,
    TransferDomain,
    EvmTx,
}

impl CustomTxType {
    pub fn discriminator(&self) -> u8 {
        match self {
            CustomTxType::CreateToken => b'T',
            CustomTxType::MintToken => b'M',
            CustomTxType::BurnToken => b'F',
            CustomTxType::UpdateToken => b'N',
            CustomTxType::UtxosToAccount => b'U',
            CustomTxType::AccountToUtxos => b'b',
            CustomTxType::AccountToAccount => b'B',
            CustomTxType::AnyAccountsToAccounts => b'a',
            CustomTxType::CreatePoolPair => b'p',
            CustomTxType::UpdatePoolPair => b'u',
            CustomTxType::PoolSwap => b's',
            CustomTxType::PoolSwapV2 => b'i',
            CustomTxType::AddPoolLiquidity => b'l',
            CustomTxType::RemovePoolLiquidity => b'r',
            CustomTxType::SetGovVariable => b'G',
            CustomTxType::SetGovVariableHeight => b'j',
            CustomTxType::AppointOracle => b'o',
            CustomTxType::RemoveOracle => b'h',
            CustomTxType::UpdateOracle => b't',
            CustomTxType::SetOracleData => b'y',
            CustomTxType::SetCollateralToken => b'c',
            CustomTxType::SetLoanToken => b'g',
            CustomTxType::UpdateLoanToken => b'x',
            CustomTxType::LoanScheme => b'L',
            CustomTxType::DefaultLoanScheme => b'd',
            CustomTxType::DestroyLoanScheme => b'D',
            CustomTxType::Vault => b'V',
            CustomTxType::CloseVault => b'e',
            CustomTxType::UpdateVault => b'v',
            CustomTxType::DepositToVault => b'S',
            CustomTxType::WithdrawFromVault => b'J',
            CustomTxType::TakeLoan => b'X',
            CustomTxType::PaybackLoan => b'H',
            CustomTxType::AuctionBid => b'I',
            CustomTxType::CreateCfp => b'z',
            CustomTxType::CreateVoc => b'E',
            CustomTxType::Vote => b'O',
            CustomTxType::TransferDomain => b'8',
            CustomTxType::EvmTx => b'9',
        }
    }

    pub fn from_discriminator(value: u8) -> Option<Self> {
        CustomTxType::iter().find(|kind| kind.discriminator() == value)
    }
}

/// Decoded body of a custom transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum CustomTxMessage {
    CreateToken(CreateTokenMessage),
    MintToken(MintTokensMessage),
    BurnToken(BurnTokensMessage),
    UpdateToken(UpdateTokenMessage),
    UtxosToAccount(UtxosToAccountMessage),
    AccountToUtxos(AccountToUtxosMessage),
    AccountToAccount(AccountToAccountMessage),
    AnyAccountsToAccounts(AnyAccountsToAccountsMessage),
    CreatePoolPair(CreatePoolPairMessage),
    UpdatePoolPair(UpdatePoolPairMessage),
    PoolSwap(PoolSwapMessage),
    PoolSwapV2(CompositeSwapMessage),
    AddPoolLiquidity(AddPoolLiquidityMessage),
    RemovePoolLiquidity(RemovePoolLiquidityMessage),
    SetGovVariable(SetGovMessage),
    SetGovVariableHeight(SetGovHeightMessage),
    AppointOracle(AppointOracleMessage),
    RemoveOracle(RemoveOracleMessage),
    UpdateOracle(UpdateOracleMessage),
    SetOracleData(SetOracleDataMessage),
    SetCollateralToken(SetCollateralTokenMessage),
    SetLoanToken(SetLoanTokenMessage),
    UpdateLoanToken(UpdateLoanTokenMessage),
    LoanScheme(LoanSchemeMessage),
    DefaultLoanScheme(DefaultLoanSchemeMessage),
    DestroyLoanScheme(DestroyLoanSchemeMessage),
    Vault(CreateVaultMessage),
    CloseVault(CloseVaultMessage),
    UpdateVault(UpdateVaultMessage),
    DepositToVault(DepositToVaultMessage),
    WithdrawFromVault(WithdrawFromVaultMessage),
    TakeLoan(TakeLoanMessage),
    PaybackLoan(PaybackLoanMessage),
    AuctionBid(AuctionBidMessage),
    CreateCfp(CreateProposalMessage),
    CreateVoc(CreateProposalMessage),
    Vote(VoteMessage),
    TransferDomain(TransferDomainMessage),
    EvmTx(EvmTxMessage),
}

macro_rules! dispatch_message {
    ($self:expr, $msg:ident => $body:expr) => {
        match $self {
            CustomTxMessage::CreateToken($msg) => $body,
            CustomTxMessage::MintToken($msg) => $body,
            CustomTxMessage::BurnToken($msg) => $body,
            CustomTxMessage::UpdateToken($msg) => $body,
            CustomTxMessage::UtxosToAccount($msg) => $body,
            CustomTxMessage::AccountToUtxos($msg) => $body,
            CustomTxMessage::AccountToAccount($msg) => $body,
            CustomTxMessage::AnyAccountsToAccounts($msg) => $body,
            CustomTxMessage::CreatePoolPair($msg) => $body,
            CustomTxMessage::UpdatePoolPair($msg) => $body,
            CustomTxMessage::PoolSwap($msg) => $body,
            CustomTxMessage::PoolSwapV2($msg) => $body,
            CustomTxMessage::AddPoolLiquidity($msg) => $body,
            CustomTxMessage::RemovePoolLiquidity($msg) => $body,
            CustomTxMessage::SetGovVariable($msg) => $body,
            CustomTxMessage::SetGovVariableHeight($msg) => $body,
            CustomTxMessage::AppointOracle($msg) => $body,
            CustomTxMessage::RemoveOracle($msg) => $body,
            CustomTxMessage::UpdateOracle($msg) => $body,
            CustomTxMessage::SetOracleData($msg) => $body,
            CustomTxMessage::SetCollateralToken($msg) => $body,
            CustomTxMessage::SetLoanToken($msg) => $body,
            CustomTxMessage::UpdateLoanToken($msg) => $body,
            CustomTxMessage::LoanScheme($msg) => $body,
            CustomTxMessage::DefaultLoanScheme($msg) => $body,
            CustomTxMessage::DestroyLoanScheme($msg) => $body,
            CustomTxMessage::Vault($msg) => $body,
            CustomTxMessage::CloseVault($msg) => $body,
            CustomTxMessage::UpdateVault($msg) => $body,
            CustomTxMessage::DepositToVault($msg) => $body,
            CustomTxMessage::WithdrawFromVault($msg) => $body,
            CustomTxMessage::TakeLoan($msg) => $body,
            CustomTxMessage::PaybackLoan($msg) => $body,
            CustomTxMessage::AuctionBid($msg) => $body,
            CustomTxMessage::CreateCfp($msg) => $body,
            CustomTxMessage::CreateVoc($msg) => $body,
            CustomTxMessage::Vote($msg) => $body,
            CustomTxMessage::TransferDomain($msg) => $body,
            CustomTxMessage::EvmTx($msg) => $body,
        }
    };
}

impl CustomTxMessage {
    pub fn tx_type(&self) -> CustomTxType {
        match self {
            CustomTxMessage::CreateToken(_) => CustomTxType::CreateToken,
            CustomTxMessage::MintToken(_) => CustomTxType::MintToken,
            CustomTxMessage::BurnToken(_) => CustomTxType::BurnToken,
            CustomTxMessage::UpdateToken(_) => CustomTxType::UpdateToken,
            CustomTxMessage::UtxosToAccount(_) => CustomTxType::UtxosToAccount,
            CustomTxMessage::AccountToUtxos(_) => CustomTxType::AccountToUtxos,
            CustomTxMessage::AccountToAccount(_) => CustomTxType::AccountToAccount,
            CustomTxMessage::AnyAccountsToAccounts(_) => CustomTxType::AnyAccountsToAccounts,
            CustomTxMessage::CreatePoolPair(_) => CustomTxType::CreatePoolPair,
            CustomTxMessage::UpdatePoolPair(_) => CustomTxType::UpdatePoolPair,
            CustomTxMessage::PoolSwap(_) => CustomTxType::PoolSwap,
            CustomTxMessage::PoolSwapV2(_) => CustomTxType::PoolSwapV2,
            CustomTxMessage::AddPoolLiquidity(_) => CustomTxType::AddPoolLiquidity,
            CustomTxMessage::RemovePoolLiquidity(_) => CustomTxType::RemovePoolLiquidity,
            CustomTxMessage::SetGovVariable(_) => CustomTxType::SetGovVariable,
            CustomTxMessage::SetGovVariableHeight(_) => CustomTxType::SetGovVariableHeight,
            CustomTxMessage::AppointOracle(_) => CustomTxType::AppointOracle,
            CustomTxMessage::RemoveOracle(_) => CustomTxType::RemoveOracle,
            CustomTxMessage::UpdateOracle(_) => CustomTxType::UpdateOracle,
            CustomTxMessage::SetOracleData(_) => CustomTxType::SetOracleData,
            CustomTxMessage::SetCollateralToken(_) => CustomTxType::SetCollateralToken,
            CustomTxMessage::SetLoanToken(_) => CustomTxType::SetLoanToken,
            CustomTxMessage::UpdateLoanToken(_) => CustomTxType::UpdateLoanToken,
            CustomTxMessage::LoanScheme(_) => CustomTxType::LoanScheme,
            CustomTxMessage::DefaultLoanScheme(_) => CustomTxType::DefaultLoanScheme,
            CustomTxMessage::DestroyLoanScheme(_) => CustomTxType::DestroyLoanScheme,
            CustomTxMessage::Vault(_) => CustomTxType::Vault,
            CustomTxMessage::CloseVault(_) => CustomTxType::CloseVault,
            CustomTxMessage::UpdateVault(_) => CustomTxType::UpdateVault,
            CustomTxMessage::DepositToVault(_) => CustomTxType::DepositToVault,
            CustomTxMessage::WithdrawFromVault(_) => CustomTxType::WithdrawFromVault,
            CustomTxMessage::TakeLoan(_) => CustomTxType::TakeLoan,
            CustomTxMessage::PaybackLoan(_) => CustomTxType::PaybackLoan,
            CustomTxMessage::AuctionBid(_) => CustomTxType::AuctionBid,
            CustomTxMessage::CreateCfp(_) => CustomTxType::CreateCfp,
            CustomTxMessage::CreateVoc(_) => CustomTxType::CreateVoc,
            CustomTxMessage::Vote(_) => CustomTxType::Vote,
            CustomTxMessage::TransferDomain(_) => CustomTxType::TransferDomain,
            CustomTxMessage::EvmTx(_) => CustomTxType::EvmTx,
        }
    }

    fn read_body(kind: CustomTxType, reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match kind {
            CustomTxType::CreateToken => CustomTxMessage::CreateToken(reader.read()?),
            CustomTxType::MintToken => CustomTxMessage::MintToken(reader.read()?),
            CustomTxType::BurnToken => CustomTxMessage::BurnToken(reader.read()?),
            CustomTxType::UpdateToken => CustomTxMessage::UpdateToken(reader.read()?),
            CustomTxType::UtxosToAccount => CustomTxMessage::UtxosToAccount(reader.read()?),
            CustomTxType::AccountToUtxos => CustomTxMessage::AccountToUtxos(reader.read()?),
            CustomTxType::AccountToAccount => CustomTxMessage::AccountToAccount(reader.read()?),
            CustomTxType::AnyAccountsToAccounts => {
                CustomTxMessage::AnyAccountsToAccounts(reader.read()?)
            }
            CustomTxType::CreatePoolPair => CustomTxMessage::CreatePoolPair(reader.read()?),
            CustomTxType::UpdatePoolPair => CustomTxMessage::UpdatePoolPair(reader.read()?),
            CustomTxType::PoolSwap => CustomTxMessage::PoolSwap(reader.read()?),
            CustomTxType::PoolSwapV2 => CustomTxMessage::PoolSwapV2(reader.read()?),
            CustomTxType::AddPoolLiquidity => CustomTxMessage::AddPoolLiquidity(reader.read()?),
            CustomTxType::RemovePoolLiquidity => {
                CustomTxMessage::RemovePoolLiquidity(reader.read()?)
            }
            CustomTxType::SetGovVariable => CustomTxMessage::SetGovVariable(reader.read()?),
            CustomTxType::SetGovVariableHeight => {
                CustomTxMessage::SetGovVariableHeight(reader.read()?)
            }
            CustomTxType::AppointOracle => CustomTxMessage::AppointOracle(reader.read()?),
            CustomTxType::RemoveOracle => CustomTxMessage::RemoveOracle(reader.read()?),
            CustomTxType::UpdateOracle => CustomTxMessage::UpdateOracle(reader.read()?),
            CustomTxType::SetOracleData => CustomTxMessage::SetOracleData(reader.read()?),
            CustomTxType::SetCollateralToken => CustomTxMessage::SetCollateralToken(reader.read()?),
            CustomTxType::SetLoanToken => CustomTxMessage::SetLoanToken(reader.read()?),
            CustomTxType::UpdateLoanToken => CustomTxMessage::UpdateLoanToken(reader.read()?),
            CustomTxType::LoanScheme => CustomTxMessage::LoanScheme(reader.read()?),
            CustomTxType::DefaultLoanScheme => CustomTxMessage::DefaultLoanScheme(reader.read()?),
            CustomTxType::DestroyLoanScheme => CustomTxMessage::DestroyLoanScheme(reader.read()?),
            CustomTxType::Vault => CustomTxMessage::Vault(reader.read()?),
            CustomTxType::CloseVault => CustomTxMessage::CloseVault(reader.read()?),
            CustomTxType::UpdateVault => CustomTxMessage::UpdateVault(reader.read()?),
            CustomTxType::DepositToVault => CustomTxMessage::DepositToVault(reader.read()?),
            CustomTxType::WithdrawFromVault => CustomTxMessage::WithdrawFromVault(reader.read()?),
            CustomTxType::TakeLoan => CustomTxMessage::TakeLoan(reader.read()?),
            CustomTxType::PaybackLoan => CustomTxMessage::PaybackLoan(reader.read()?),
            CustomTxType::AuctionBid => CustomTxMessage::AuctionBid(reader.read()?),
            CustomTxType::CreateCfp => CustomTxMessage::CreateCfp(reader.read()?),
            CustomTxType::CreateVoc => CustomTxMessage::CreateVoc(reader.read()?),
            CustomTxType::Vote => CustomTxMessage::Vote(reader.read()?),
            CustomTxType::TransferDomain => CustomTxMessage::TransferDomain(reader.read()?),
            CustomTxType::EvmTx => CustomTxMessage::EvmTx(reader.read()?),
        })
    }

    /// Encode as `magic | discriminator | body`.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_bytes(&CUSTOM_TX_MAGIC);
        writer.write_u8(self.tx_type().discriminator());
        dispatch_message!(self, msg => msg.write(&mut writer));
        writer.bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(payload);
        let magic: [u8; 4] = reader.read_bytes(4)?;
        if magic != CUSTOM_TX_MAGIC {
            return Err(ReaderError::InvalidValue);
        }

        let id = reader.read_u8()?;
        let kind = CustomTxType::from_discriminator(id).ok_or(ReaderError::UnknownDiscriminator(id))?;
        let message = Self::read_body(kind, &mut reader)?;
        if reader.size() != 0 {
            return Err(ReaderError::InvalidSize);
        }

        Ok(message)
    }

    pub fn to_script(&self) -> Script {
        Script::data_carrier(&self.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub script: Script,
    pub value: Amount,
}

/// Base transaction view handed over by the block processor.
///
/// `outputs[0]` is the data carrier holding the custom payload, its value is
/// the amount of native coin the transaction moves into the engine. `auth`
/// lists the scripts proven by the signed inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTransaction {
    pub hash: Hash,
    pub outputs: Vec<TxOut>,
    pub auth: Vec<Script>,
}

impl CustomTransaction {
    pub fn new(hash: Hash, message: &CustomTxMessage, auth: Vec<Script>) -> Self {
        Self {
            hash,
            outputs: vec![TxOut {
                script: message.to_script(),
                value: 0,
            }],
            auth,
        }
    }

    pub fn with_burnt_value(mut self, value: Amount) -> Self {
        if let Some(out) = self.outputs.first_mut() {
            out.value = value;
        }
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<TxOut>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn burnt_value(&self) -> Amount {
        self.outputs.first().map_or(0, |out| out.value)
    }

    pub fn message(&self) -> Result<CustomTxMessage, ReaderError> {
        let out = self.outputs.first().ok_or(ReaderError::InvalidSize)?;
        let payload = out.script.data_carrier_payload().ok_or(ReaderError::InvalidValue)?;
        CustomTxMessage::decode(payload)
    }

    pub fn has_auth(&self, script: &Script) -> bool {
        self.auth.iter().any(|s| s == script)
    }
}

impl Serializer for TxOut {
    fn write(&self, writer: &mut Writer) {
        self.script.write(writer);
        writer.write_i64(self.value);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            script: reader.read()?,
            value: reader.read_i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{Balances, COIN};
    use crate::dex::PoolPrice;
    use std::collections::HashSet;

    #[test]
    fn test_discriminators_are_unique() {
        let ids: HashSet<u8> = CustomTxType::iter().map(|k| k.discriminator()).collect();
        assert_eq!(ids.len(), CustomTxType::iter().count());
        for kind in CustomTxType::iter() {
            assert_eq!(CustomTxType::from_discriminator(kind.discriminator()), Some(kind));
        }
    }

    #[test]
    fn test_custom_tx_wire_layout() {
        let msg = CustomTxMessage::PoolSwap(PoolSwapMessage {
            from: Script::p2pkh([1; 20]),
            token_from: 0,
            amount_from: COIN,
            to: Script::p2pkh([2; 20]),
            token_to: 1,
            max_price: PoolPrice::unlimited(),
        });
        let bytes = msg.encode();
        assert_eq!(&bytes[..4], b"DfTx");
        assert_eq!(bytes[4], b's');
        // length prefixed script right after the discriminator
        assert_eq!(bytes[5], 25);
        assert_eq!(CustomTxMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(CustomTxMessage::decode(b"DfTy").is_err());
        assert!(matches!(
            CustomTxMessage::decode(b"DfTx\x01"),
            Err(ReaderError::UnknownDiscriminator(1))
        ));

        let msg = CustomTxMessage::MintToken(MintTokensMessage {
            amounts: Balances::from_single(1, 5),
            to: Script::empty(),
        });
        let mut bytes = msg.encode();
        bytes.push(0);
        assert!(matches!(CustomTxMessage::decode(&bytes), Err(ReaderError::InvalidSize)));
    }

    #[test]
    fn test_custom_transaction_message() {
        let msg = CustomTxMessage::RemoveOracle(RemoveOracleMessage {
            oracle_id: Hash::zero(),
        });
        let tx = CustomTransaction::new(Hash::max(), &msg, vec![]).with_burnt_value(5);
        assert_eq!(tx.burnt_value(), 5);
        assert_eq!(tx.message().unwrap(), msg);
    }
}
