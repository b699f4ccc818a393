// ABI surface the keeper touches: the Multicall3 aggregator and the
// read/resolve entry points every tracked contract exposes.

alloy_sol_types::sol! {
    struct Multicall3Call {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Multicall3Result {
        bool success;
        bytes returnData;
    }

    function aggregate3(Multicall3Call[] calldata calls)
        external
        payable
        returns (Multicall3Result[] memory returnData);

    function getTerms()
        external
        view
        returns (
            address longParty,
            address shortParty,
            uint256 strikePrice,
            uint256 notionalSize,
            uint256 premium
        );

    function getStatus()
        external
        view
        returns (
            bool funded,
            bool active,
            bool exercised,
            bool resolved,
            uint256 expiryTimestamp,
            uint256 priceAtExpiry
        );

    function getParameters() external view returns (bytes params);

    function expiry() external view returns (uint256 expiryTimestamp);

    function resolve() external;
}
