/// Lua script for token bucket rate limiting in Redis
///
/// Refills in whole intervals and consumes one token. Redis runs the script
/// atomically, so concurrent callers on any instance see a consistent bucket.
///
/// KEYS[1] = the bucket key
/// ARGV[1] = capacity
/// ARGV[2] = tokens added per interval
/// ARGV[3] = refill interval (milliseconds)
/// ARGV[4] = current timestamp (milliseconds)
/// ARGV[5] = entry TTL (milliseconds)
///
/// Returns: [consumed (0/1), remaining tokens, milliseconds until next refill]
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_tokens = tonumber(ARGV[2])
local interval = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

-- Get current state
local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])

-- Initialize if this is the first request
if tokens == nil or last_refill == nil then
    tokens = capacity
    last_refill = now
end

-- Refill whole intervals only
local elapsed = math.max(0, now - last_refill)
local intervals = math.floor(elapsed / interval)
if intervals > 0 then
    tokens = tokens + intervals * refill_tokens
    last_refill = last_refill + intervals * interval
end
tokens = math.min(capacity, tokens)

local consumed = 0
local wait = 0

if tokens >= 1 then
    tokens = tokens - 1
    consumed = 1
else
    wait = math.max(0, last_refill + interval - now)
end

-- Update state
redis.call('HSET', key, 'tokens', tokens, 'last_refill', last_refill)
redis.call('PEXPIRE', key, ttl)

return {consumed, tokens, wait}
"#;
