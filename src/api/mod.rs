pub mod binance;
pub mod exchange;

pub use binance::{ApiCredentials, BinanceFuturesClient};
pub use exchange::{
    parse_decimal, AccountInfo, ApiErrorBody, AssetBalance, BatchOrderResult, Exchange,
    ExchangeError, ExchangeInfo, OpenInterest, OpenInterestStat, OrderAck, OrderRequest,
    OrderSide, OrderType, PositionRisk, PremiumIndex, RawKline, SymbolFilter, SymbolInfo,
    TickerPrice, WorkingType,
};
