//! Typed contract surfaces the indexer touches: the Saddle-style swap pools,
//! the bridge's fee-balance view, the bridge-config token registry and plain
//! ERC20 metadata/balances.
//!
//! Bridge *events* are intentionally absent here: the bridge went through
//! three ABI revisions that share topic0 values but differ in data layout, so
//! the decoder parses those word-by-word instead of binding one layout.

use alloy::sol;

sol! {
    /// Swap pool shared by the nUSD and nETH pool families.
    #[derive(Debug)]
    interface SwapPool {
        event TokenSwap(address indexed buyer, uint256 tokensSold, uint256 tokensBought, uint128 soldId, uint128 boughtId);
        event NewAdminFee(uint256 newAdminFee);
        event NewSwapFee(uint256 newSwapFee);
        event AddLiquidity(address indexed provider, uint256[] tokenAmounts, uint256[] fees, uint256 invariant, uint256 lpTokenSupply);
        event RemoveLiquidityOne(address indexed provider, uint256 lpTokenAmount, uint256 lpTokenSupply, uint256 boughtId, uint256 tokensBought);
        event RemoveLiquidityImbalance(address indexed provider, uint256[] tokenAmounts, uint256[] fees, uint256 invariant, uint256 lpTokenSupply);

        function getToken(uint8 index) external view returns (address);
        function getAdminBalance(uint256 index) external view returns (uint256);
        function getVirtualPrice() external view returns (uint256);
    }

    #[derive(Debug)]
    interface Bridge {
        function getFeeBalance(address tokenAddress) external view returns (uint256);
    }

    /// On-chain token registry consulted when an event references a token the
    /// static tables do not know.
    #[derive(Debug)]
    interface BridgeConfig {
        struct Token {
            uint256 chainId;
            address tokenAddress;
            uint8 tokenDecimals;
            uint256 maxSwap;
            uint256 minSwap;
            uint256 swapFee;
            uint256 maxSwapFee;
            uint256 minSwapFee;
            bool hasUnderlying;
            bool isUnderlying;
        }

        function getTokenByAddress(address tokenAddress, uint256 chainID) external view returns (Token memory);
    }

    #[derive(Debug)]
    interface Erc20 {
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string memory);
        function name() external view returns (string memory);
    }
}
