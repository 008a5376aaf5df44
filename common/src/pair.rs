use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        function getReserves()
            external
            view
            returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}
