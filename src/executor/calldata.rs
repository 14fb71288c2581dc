//! Router calldata for a selected route
//!
//! Only encodes; nothing is signed or sent from here.

use alloy_primitives::aliases::{U160, U24};
use alloy_primitives::{address, Address, Bytes, I256, U256};
use alloy_sol_types::{sol, SolCall};

use super::SwapRequest;
use crate::error::{PricingError, PricingResult};
use crate::router::Route;

sol! {
    /// Uniswap V2 / SushiSwap router
    #[derive(Debug)]
    interface IUniswapV2Router02 {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }

    /// Uniswap V3 SwapRouter
    #[derive(Debug)]
    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        struct ExactInputParams {
            bytes path;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
        function exactInput(ExactInputParams calldata params) external payable returns (uint256 amountOut);
    }

    /// Balancer V2 Vault swaps
    #[derive(Debug)]
    interface IBalancerVault {
        struct SingleSwap {
            bytes32 poolId;
            uint8 kind;
            address assetIn;
            address assetOut;
            uint256 amount;
            bytes userData;
        }

        struct BatchSwapStep {
            bytes32 poolId;
            uint256 assetInIndex;
            uint256 assetOutIndex;
            uint256 amount;
            bytes userData;
        }

        struct FundManagement {
            address sender;
            bool fromInternalBalance;
            address recipient;
            bool toInternalBalance;
        }

        function swap(
            SingleSwap memory singleSwap,
            FundManagement memory funds,
            uint256 limit,
            uint256 deadline
        ) external payable returns (uint256);

        function batchSwap(
            uint8 kind,
            BatchSwapStep[] memory swaps,
            address[] memory assets,
            FundManagement memory funds,
            int256[] memory limits,
            uint256 deadline
        ) external payable returns (int256[] memory);
    }
}

pub const UNISWAP_V2_ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
pub const SUSHISWAP_ROUTER: Address = address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F");
pub const UNISWAP_V3_ROUTER: Address = address!("E592427A0AEce92De3Edee1F18E0157C05861564");
pub const BALANCER_VAULT: Address = address!("BA12222222228d8Ba445958a75a0704d566BF2C8");

/// Balancer `SwapKind.GIVEN_IN`
const GIVEN_IN: u8 = 0;

/// Transaction target and input for a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSwap {
    pub to: Address,
    pub data: Bytes,
}

impl EncodedSwap {
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// tokenIn | fee | connector | fee | tokenOut, packed
fn v3_path(tokens: [Address; 3], fees: [u32; 2]) -> Bytes {
    let mut path = Vec::with_capacity(20 * 3 + 3 * 2);
    path.extend_from_slice(tokens[0].as_slice());
    path.extend_from_slice(&fees[0].to_be_bytes()[1..]);
    path.extend_from_slice(tokens[1].as_slice());
    path.extend_from_slice(&fees[1].to_be_bytes()[1..]);
    path.extend_from_slice(tokens[2].as_slice());
    path.into()
}

fn to_signed(value: U256) -> PricingResult<I256> {
    I256::try_from(value).map_err(|_| PricingError::Math("amount does not fit int256"))
}

fn funds(recipient: Address) -> IBalancerVault::FundManagement {
    IBalancerVault::FundManagement {
        sender: recipient,
        fromInternalBalance: false,
        recipient,
        toInternalBalance: false,
    }
}

/// Calldata for executing `route` with the request's floor and deadline
pub fn encode_route(route: &Route, request: &SwapRequest) -> PricingResult<EncodedSwap> {
    let deadline = U256::from(request.deadline);

    let encoded = match route {
        Route::None => {
            return Err(PricingError::NoRoute {
                sell: request.sell,
                buy: request.buy,
            })
        }
        Route::UniswapV2 { .. } | Route::SushiSwap { .. } => {
            let to = if matches!(route, Route::UniswapV2 { .. }) {
                UNISWAP_V2_ROUTER
            } else {
                SUSHISWAP_ROUTER
            };
            let call = IUniswapV2Router02::swapExactTokensForTokensCall {
                amountIn: request.amount_in,
                amountOutMin: request.min_amount_out,
                path: vec![request.sell, request.buy],
                to: request.recipient,
                deadline,
            };
            EncodedSwap { to, data: call.abi_encode().into() }
        }
        Route::UniswapV3 { fee, .. } => {
            let call = ISwapRouter::exactInputSingleCall {
                params: ISwapRouter::ExactInputSingleParams {
                    tokenIn: request.sell,
                    tokenOut: request.buy,
                    fee: U24::from(*fee),
                    recipient: request.recipient,
                    deadline,
                    amountIn: request.amount_in,
                    amountOutMinimum: request.min_amount_out,
                    sqrtPriceLimitX96: U160::ZERO,
                },
            };
            EncodedSwap { to: UNISWAP_V3_ROUTER, data: call.abi_encode().into() }
        }
        Route::UniswapV3WithConnector { connector, legs } => {
            let call = ISwapRouter::exactInputCall {
                params: ISwapRouter::ExactInputParams {
                    path: v3_path([request.sell, *connector, request.buy], [legs[0].fee, legs[1].fee]),
                    recipient: request.recipient,
                    deadline,
                    amountIn: request.amount_in,
                    amountOutMinimum: request.min_amount_out,
                },
            };
            EncodedSwap { to: UNISWAP_V3_ROUTER, data: call.abi_encode().into() }
        }
        Route::Balancer { pool_id } => {
            let call = IBalancerVault::swapCall {
                singleSwap: IBalancerVault::SingleSwap {
                    poolId: *pool_id,
                    kind: GIVEN_IN,
                    assetIn: request.sell,
                    assetOut: request.buy,
                    amount: request.amount_in,
                    userData: Bytes::new(),
                },
                funds: funds(request.recipient),
                limit: request.min_amount_out,
                deadline,
            };
            EncodedSwap { to: BALANCER_VAULT, data: call.abi_encode().into() }
        }
        Route::BalancerWithConnector { connector, pool_ids } => {
            let swaps = vec![
                IBalancerVault::BatchSwapStep {
                    poolId: pool_ids[0],
                    assetInIndex: U256::from(0u8),
                    assetOutIndex: U256::from(1u8),
                    amount: request.amount_in,
                    userData: Bytes::new(),
                },
                // amount 0: use the previous step's output
                IBalancerVault::BatchSwapStep {
                    poolId: pool_ids[1],
                    assetInIndex: U256::from(1u8),
                    assetOutIndex: U256::from(2u8),
                    amount: U256::ZERO,
                    userData: Bytes::new(),
                },
            ];
            // positive: max sent in, negative: min received
            let limits = vec![
                to_signed(request.amount_in)?,
                I256::ZERO,
                -to_signed(request.min_amount_out)?,
            ];
            let call = IBalancerVault::batchSwapCall {
                kind: GIVEN_IN,
                swaps,
                assets: vec![request.sell, *connector, request.buy],
                funds: funds(request.recipient),
                limits,
                deadline,
            };
            EncodedSwap { to: BALANCER_VAULT, data: call.abi_encode().into() }
        }
    };
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::V3Leg;
    use crate::tokens::{DAI, USDC, WETH};
    use alloy_primitives::B256;

    fn request() -> SwapRequest {
        SwapRequest {
            sell: DAI,
            buy: USDC,
            amount_in: U256::from(1_000u64),
            min_amount_out: U256::from(990u64),
            recipient: Address::repeat_byte(0xAA),
            deadline: 1_700_000_600,
        }
    }

    #[test]
    fn test_v2_routes_pick_their_router() {
        let uni = encode_route(&Route::UniswapV2 { pair: Address::ZERO }, &request()).unwrap();
        let sushi = encode_route(&Route::SushiSwap { pair: Address::ZERO }, &request()).unwrap();
        assert_eq!(uni.to, UNISWAP_V2_ROUTER);
        assert_eq!(sushi.to, SUSHISWAP_ROUTER);
        assert_eq!(uni.selector(), Some(IUniswapV2Router02::swapExactTokensForTokensCall::SELECTOR));

        let decoded = IUniswapV2Router02::swapExactTokensForTokensCall::abi_decode(&uni.data).unwrap();
        assert_eq!(decoded.path, vec![DAI, USDC]);
        assert_eq!(decoded.amountOutMin, U256::from(990u64));
    }

    #[test]
    fn test_v3_connector_path_is_packed() {
        let leg = |fee| V3Leg { pool: Address::ZERO, fee };
        let route = Route::UniswapV3WithConnector {
            connector: WETH,
            legs: [leg(3000), leg(500)],
        };
        let encoded = encode_route(&route, &request()).unwrap();
        assert_eq!(encoded.to, UNISWAP_V3_ROUTER);
        assert_eq!(encoded.selector(), Some(ISwapRouter::exactInputCall::SELECTOR));

        let decoded = ISwapRouter::exactInputCall::abi_decode(&encoded.data).unwrap();
        let path = decoded.params.path;
        assert_eq!(path.len(), 66);
        assert_eq!(&path[..20], DAI.as_slice());
        assert_eq!(&path[20..23], &[0x00, 0x0b, 0xb8]);
        assert_eq!(&path[23..43], WETH.as_slice());
        assert_eq!(&path[43..46], &[0x00, 0x01, 0xf4]);
        assert_eq!(&path[46..], USDC.as_slice());
    }

    #[test]
    fn test_balancer_batch_limits() {
        let route = Route::BalancerWithConnector {
            connector: WETH,
            pool_ids: [B256::repeat_byte(1), B256::repeat_byte(2)],
        };
        let encoded = encode_route(&route, &request()).unwrap();
        assert_eq!(encoded.to, BALANCER_VAULT);

        let decoded = IBalancerVault::batchSwapCall::abi_decode(&encoded.data).unwrap();
        assert_eq!(decoded.assets, vec![DAI, WETH, USDC]);
        assert_eq!(decoded.limits[0], I256::try_from(1_000i64).unwrap());
        assert_eq!(decoded.limits[2], I256::try_from(-990i64).unwrap());
        assert_eq!(decoded.swaps[1].amount, U256::ZERO);
    }

    #[test]
    fn test_no_route_has_no_calldata() {
        assert!(matches!(
            encode_route(&Route::None, &request()),
            Err(PricingError::NoRoute { .. })
        ));
    }
}
